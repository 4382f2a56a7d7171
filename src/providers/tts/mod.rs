pub mod google_cloud;
pub mod gtts;

pub use google_cloud::GoogleCloudTts;
pub use gtts::GttsSynthesizer;
