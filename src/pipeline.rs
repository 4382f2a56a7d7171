//! The pipeline orchestrator.
//!
//! A linear list of named steps, each checkpointed in the project store.
//! A step computes its pending units by subtracting persisted artifacts from
//! the full set, dispatches them to a bounded worker pool, and persists each
//! result before bumping progress, so a crash at any point resumes exactly
//! where it left off. The three TTS steps run concurrently because their
//! artifacts are independent.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::audio::{AssemblerConfig, AudioAssembler, SentenceAudio};
use crate::config::Settings;
use crate::error::{BilangError, Result};
use crate::providers::{SpeechSynthesizer, Translator};
use crate::rare::{Lemmatizer, RareWordConfig, RareWordIndex, ZipfScorer};
use crate::store::{ProjectStore, Status};
use crate::subtitle::{AssConfig, AssGenerator, WordCardEntry};
use crate::text::Splitter;
use crate::video::{render_video, VideoConfig};

/// Pipeline steps in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Sentences,
    Translations,
    RareWordsExtract,
    RareWordsTranslate,
    TtsSource,
    TtsTarget,
    TtsWordcards,
    AudioCombined,
    Video,
}

impl Step {
    pub const ORDER: &'static [Step] = &[
        Step::Sentences,
        Step::Translations,
        Step::RareWordsExtract,
        Step::RareWordsTranslate,
        Step::TtsSource,
        Step::TtsTarget,
        Step::TtsWordcards,
        Step::AudioCombined,
        Step::Video,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Step::Sentences => "sentences",
            Step::Translations => "translations",
            Step::RareWordsExtract => "rare_words_extract",
            Step::RareWordsTranslate => "rare_words_translate",
            Step::TtsSource => "tts_source",
            Step::TtsTarget => "tts_target",
            Step::TtsWordcards => "tts_wordcards",
            Step::AudioCombined => "audio_combined",
            Step::Video => "video",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Step::ORDER
            .iter()
            .copied()
            .find(|step| step.name() == s)
            .ok_or_else(|| format!("Unknown step: {s}"))
    }
}

/// Progress event consumed by the printer task.
#[derive(Debug, Clone, Copy)]
pub struct ProgressEvent {
    pub step: Step,
    pub done: usize,
    pub total: usize,
}

/// Single consumer of progress events; the only component that writes
/// progress to the terminal.
pub fn spawn_progress_printer(
    mut rx: UnboundedReceiver<ProgressEvent>,
    show_progress: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !show_progress {
            while rx.recv().await.is_some() {}
            return;
        }

        let multi = MultiProgress::new();
        let style = ProgressStyle::default_bar()
            .template("{prefix:>20} [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        let mut bars: HashMap<Step, ProgressBar> = HashMap::new();

        while let Some(event) = rx.recv().await {
            let bar = bars.entry(event.step).or_insert_with(|| {
                let bar = multi.add(ProgressBar::new(event.total.max(1) as u64));
                bar.set_style(style.clone());
                bar.set_prefix(event.step.name());
                bar
            });
            bar.set_length(event.total.max(1) as u64);
            bar.set_position(event.done as u64);
            if event.total > 0 && event.done >= event.total && !bar.is_finished() {
                bar.finish();
            }
        }
    })
}

/// Shared per-step progress state: persists done counts and feeds the
/// progress channel.
struct StepTracker {
    step: Step,
    total: usize,
    done: AtomicUsize,
    store: Arc<ProjectStore>,
    tx: UnboundedSender<ProgressEvent>,
}

impl StepTracker {
    fn start(
        step: Step,
        done: usize,
        total: usize,
        store: Arc<ProjectStore>,
        tx: UnboundedSender<ProgressEvent>,
    ) -> Result<Arc<Self>> {
        store.set_progress(step.name(), done, total, Status::Running)?;
        let _ = tx.send(ProgressEvent { step, done, total });
        Ok(Arc::new(Self {
            step,
            total,
            done: AtomicUsize::new(done),
            store,
            tx,
        }))
    }

    /// Persist one completed unit.
    fn bump(&self) -> Result<()> {
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        self.store
            .set_progress(self.step.name(), done, self.total, Status::Running)?;
        let _ = self.tx.send(ProgressEvent {
            step: self.step,
            done,
            total: self.total,
        });
        Ok(())
    }

    fn complete(&self) -> Result<()> {
        let done = self.done.load(Ordering::SeqCst);
        self.store
            .set_progress(self.step.name(), done, self.total, Status::Complete)?;
        let _ = self.tx.send(ProgressEvent {
            step: self.step,
            done,
            total: self.total,
        });
        Ok(())
    }
}

pub struct Pipeline {
    store: Arc<ProjectStore>,
    translator: Arc<dyn Translator>,
    tts: Arc<dyn SpeechSynthesizer>,
    scorer: Arc<dyn ZipfScorer>,
    lemmatizer: Arc<dyn Lemmatizer>,
    settings: Settings,
    stop_after: Option<Step>,
    progress_tx: UnboundedSender<ProgressEvent>,
    cancelled: Arc<AtomicBool>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<ProjectStore>,
        translator: Arc<dyn Translator>,
        tts: Arc<dyn SpeechSynthesizer>,
        scorer: Arc<dyn ZipfScorer>,
        lemmatizer: Arc<dyn Lemmatizer>,
        settings: Settings,
        progress_tx: UnboundedSender<ProgressEvent>,
    ) -> Self {
        Self {
            store,
            translator,
            tts,
            scorer,
            lemmatizer,
            settings,
            stop_after: None,
            progress_tx,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop after the named step completes.
    pub fn with_stop_after(mut self, step: Option<Step>) -> Self {
        self.stop_after = step;
        self
    }

    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    /// Run the pipeline from wherever the project left off.
    pub async fn run(&self) -> Result<()> {
        let sequential = [
            Step::Sentences,
            Step::Translations,
            Step::RareWordsExtract,
            Step::RareWordsTranslate,
        ];
        for step in sequential {
            self.run_step(step).await?;
            if self.stop_after == Some(step) {
                info!("Stopping after step '{step}' as requested");
                return Ok(());
            }
        }

        // Independent artifacts: synthesize both languages (and word cards)
        // concurrently.
        if self.settings.wordcards {
            tokio::try_join!(
                self.run_step(Step::TtsSource),
                self.run_step(Step::TtsTarget),
                self.run_step(Step::TtsWordcards),
            )?;
        } else {
            tokio::try_join!(
                self.run_step(Step::TtsSource),
                self.run_step(Step::TtsTarget),
            )?;
        }
        for step in [Step::TtsSource, Step::TtsTarget, Step::TtsWordcards] {
            if self.stop_after == Some(step) {
                info!("Stopping after step '{step}' as requested");
                return Ok(());
            }
        }

        self.run_step(Step::AudioCombined).await?;
        if self.stop_after == Some(Step::AudioCombined) {
            return Ok(());
        }
        self.run_step(Step::Video).await?;
        Ok(())
    }

    async fn run_step(&self, step: Step) -> Result<()> {
        if self.store.progress(step.name()).status == Status::Complete {
            info!("[{step}] already complete, skipping");
            return Ok(());
        }
        self.check_cancelled()?;
        info!("[{step}] running");

        let result = match step {
            Step::Sentences => self.step_sentences().await,
            Step::Translations => self.step_translations().await,
            Step::RareWordsExtract => self.step_rare_extract().await,
            Step::RareWordsTranslate => self.step_rare_translate().await,
            Step::TtsSource => self.step_tts(TtsChannel::Source).await,
            Step::TtsTarget => self.step_tts(TtsChannel::Target).await,
            Step::TtsWordcards => self.step_tts_wordcards().await,
            Step::AudioCombined => self.step_audio_combined().await,
            Step::Video => self.step_video().await,
        };

        if let Err(e) = &result {
            let progress = self.store.progress(step.name());
            let _ = self
                .store
                .set_progress(step.name(), progress.done, progress.total, Status::Failed);
            error!("[{step}] failed: {e}");
        }
        result
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancelled.load(Ordering::Relaxed) {
            Err(BilangError::Input("Pipeline cancelled".to_string()))
        } else {
            Ok(())
        }
    }

    fn langs(&self) -> (String, String) {
        let meta = self.store.meta();
        (meta.source_lang, meta.target_lang)
    }

    // ------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------

    async fn step_sentences(&self) -> Result<()> {
        let (source_lang, _) = self.langs();
        let text = self.store.original_text()?;
        let splitter = Splitter::new(&source_lang, self.settings.max_sentence_length)?;
        let sentences = splitter.split(&text);
        if sentences.is_empty() {
            return Err(BilangError::Input(
                "Input text produced no sentences".to_string(),
            ));
        }

        let total = sentences.len();
        let tracker = StepTracker::start(
            Step::Sentences,
            0,
            total,
            self.store.clone(),
            self.progress_tx.clone(),
        )?;

        self.store.put_sentences(&source_lang, &sentences)?;
        tracker.done.store(total, Ordering::SeqCst);
        tracker.complete()?;
        info!("Split text into {total} sentences");
        Ok(())
    }

    async fn step_translations(&self) -> Result<()> {
        let (source_lang, target_lang) = self.langs();
        let sentences = self.store.sentences(&source_lang)?;
        let total = sentences.len();

        let mut pending: Vec<(usize, String)> = Vec::new();
        for (idx, text) in &sentences {
            if self.store.get_translation(*idx)?.is_none() {
                pending.push((*idx, text.clone()));
            }
        }

        let tracker = StepTracker::start(
            Step::Translations,
            total - pending.len(),
            total,
            self.store.clone(),
            self.progress_tx.clone(),
        )?;

        let batch_size = self.settings.translation_batch.max(1);
        let semaphore = Arc::new(Semaphore::new(self.settings.translation_parallel.max(1)));
        let mut futures = FuturesUnordered::new();

        for batch in pending.chunks(batch_size) {
            let batch: Vec<(usize, String)> = batch.to_vec();
            let sem = semaphore.clone();
            let translator = self.translator.clone();
            let store = self.store.clone();
            let tracker = tracker.clone();
            let cancelled = self.cancelled.clone();
            let (src, tgt) = (source_lang.clone(), target_lang.clone());

            futures.push(async move {
                let _permit = sem.acquire().await.expect("Semaphore closed");
                if cancelled.load(Ordering::Relaxed) {
                    return Err(BilangError::Input("Pipeline cancelled".to_string()));
                }

                let texts: Vec<&str> = batch.iter().map(|(_, t)| t.as_str()).collect();
                let translations = translator
                    .translate_batch(&texts, &src, &tgt)
                    .await
                    .inspect_err(|e| {
                        error!(
                            "[translations] batch at sentence {} failed via {}: {e}",
                            batch[0].0,
                            translator.name()
                        );
                    })?;

                for ((idx, _), translation) in batch.iter().zip(translations) {
                    store.put_translation(*idx, &translation)?;
                    tracker.bump()?;
                }
                Ok(())
            });
        }

        while let Some(result) = futures.next().await {
            result?;
        }
        tracker.complete()?;
        Ok(())
    }

    async fn step_rare_extract(&self) -> Result<()> {
        let (_, target_lang) = self.langs();
        let rows = self.store.sentences(&target_lang)?;
        let expected = self.store.meta().total_sentences;
        if rows.len() != expected {
            return Err(BilangError::Store(format!(
                "Translations incomplete: {} of {expected} sentences",
                rows.len()
            )));
        }

        let texts: Vec<String> = rows.into_iter().map(|(_, t)| t).collect();
        let total = texts.len();
        let tracker = StepTracker::start(
            Step::RareWordsExtract,
            0,
            total,
            self.store.clone(),
            self.progress_tx.clone(),
        )?;

        let config = RareWordConfig {
            zipf_threshold: self.settings.zipf_threshold,
            min_zipf: self.settings.min_zipf,
            min_per_sentence: 0,
            max_per_sentence: self.settings.max_rare_words,
            target_avg: self.settings.rare_words_target_avg,
        };
        let index = RareWordIndex::new(
            self.scorer.as_ref(),
            self.lemmatizer.as_ref(),
            &target_lang,
            config,
        );
        let selections = index.select(&texts);

        let mut selected = 0usize;
        for (idx, words) in selections.iter().enumerate() {
            self.store.put_rare_words(idx, words)?;
            selected += words.len();
            tracker.bump()?;
        }
        tracker.complete()?;
        info!("Selected {selected} rare words across {total} sentences");
        Ok(())
    }

    async fn step_rare_translate(&self) -> Result<()> {
        let (source_lang, target_lang) = self.langs();
        let words = self.store.rare_words()?;
        let total = words.len();
        let pending: Vec<_> = words
            .into_iter()
            .filter(|w| w.translation.is_none())
            .collect();

        let tracker = StepTracker::start(
            Step::RareWordsTranslate,
            total - pending.len(),
            total,
            self.store.clone(),
            self.progress_tx.clone(),
        )?;

        let semaphore = Arc::new(Semaphore::new(self.settings.translation_parallel.max(1)));
        let mut futures = FuturesUnordered::new();

        for word in pending {
            let sem = semaphore.clone();
            let translator = self.translator.clone();
            let store = self.store.clone();
            let tracker = tracker.clone();
            let cancelled = self.cancelled.clone();
            let (src, tgt) = (source_lang.clone(), target_lang.clone());

            futures.push(async move {
                let _permit = sem.acquire().await.expect("Semaphore closed");
                if cancelled.load(Ordering::Relaxed) {
                    return Err(BilangError::Input("Pipeline cancelled".to_string()));
                }

                // Dictionary cache first; the same lemma never hits the
                // translator twice across resumes.
                let translation =
                    match store.dictionary_get(&word.surface, &tgt, &src)? {
                        Some(hit) => hit,
                        None => {
                            let fresh =
                                translator.translate_word(&word.surface, &tgt, &src).await?;
                            store.dictionary_put(&word.surface, &tgt, &src, &fresh)?;
                            fresh
                        }
                    };

                store.set_rare_word_translation(
                    word.sentence_idx,
                    word.word_position,
                    &translation,
                )?;
                tracker.bump()?;
                Ok::<(), BilangError>(())
            });
        }

        while let Some(result) = futures.next().await {
            result?;
        }
        tracker.complete()?;
        Ok(())
    }

    async fn step_tts(&self, channel: TtsChannel) -> Result<()> {
        let (source_lang, target_lang) = self.langs();
        let (step, lang) = match channel {
            TtsChannel::Source => (Step::TtsSource, source_lang),
            TtsChannel::Target => (Step::TtsTarget, target_lang),
        };

        let sentences = self.store.sentences(&lang)?;
        let total = sentences.len();
        let pending: Vec<(usize, String)> = sentences
            .into_iter()
            .filter(|(idx, _)| !self.store.artifact_present(step.name(), &idx.to_string()))
            .collect();

        let tracker = StepTracker::start(
            step,
            total - pending.len(),
            total,
            self.store.clone(),
            self.progress_tx.clone(),
        )?;

        self.synthesize_units(
            step,
            pending
                .into_iter()
                .map(|(idx, text)| SynthesisUnit {
                    key: idx.to_string(),
                    text,
                    lang: lang.clone(),
                })
                .collect(),
            tracker.clone(),
        )
        .await?;

        tracker.complete()?;
        Ok(())
    }

    async fn step_tts_wordcards(&self) -> Result<()> {
        let (_, target_lang) = self.langs();
        let words = self.store.rare_words()?;
        let total = words.len();
        let pending: Vec<_> = words
            .into_iter()
            .filter(|w| {
                !self.store.artifact_present(
                    Step::TtsWordcards.name(),
                    &wordcard_key(w.sentence_idx, w.word_position),
                )
            })
            .collect();

        let tracker = StepTracker::start(
            Step::TtsWordcards,
            total - pending.len(),
            total,
            self.store.clone(),
            self.progress_tx.clone(),
        )?;

        self.synthesize_units(
            Step::TtsWordcards,
            pending
                .into_iter()
                .map(|w| SynthesisUnit {
                    key: wordcard_key(w.sentence_idx, w.word_position),
                    text: w.surface,
                    lang: target_lang.clone(),
                })
                .collect(),
            tracker.clone(),
        )
        .await?;

        tracker.complete()?;
        Ok(())
    }

    /// Common TTS worker pool. Content-addressed paths make the filesystem
    /// the cache: an existing non-empty blob is probed and recorded instead
    /// of re-synthesized.
    async fn synthesize_units(
        &self,
        step: Step,
        units: Vec<SynthesisUnit>,
        tracker: Arc<StepTracker>,
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.settings.tts_parallel.max(1)));
        let allow_missing = self.settings.allow_missing_audio;
        let mut futures = FuturesUnordered::new();

        for unit in units {
            let sem = semaphore.clone();
            let tts = self.tts.clone();
            let store = self.store.clone();
            let tracker = tracker.clone();
            let cancelled = self.cancelled.clone();

            futures.push(async move {
                let _permit = sem.acquire().await.expect("Semaphore closed");
                if cancelled.load(Ordering::Relaxed) {
                    return Err(BilangError::Input("Pipeline cancelled".to_string()));
                }

                let path = store.blob_path(&unit.text, &unit.lang, tts.voice_key());
                let cached = path.metadata().map(|m| m.len() > 0).unwrap_or(false);

                let duration_ms = if cached {
                    crate::audio::probe_duration_ms(&path)
                } else {
                    tts.synthesize(&unit.text, &unit.lang, &path)
                        .await
                        .map(|s| s.duration_ms)
                };

                match duration_ms {
                    Ok(duration_ms) => {
                        store.put_artifact(step.name(), &unit.key, &path, duration_ms)?;
                        tracker.bump()?;
                        Ok(())
                    }
                    Err(e @ BilangError::Permanent(_)) if allow_missing => {
                        warn!(
                            "[{step}] unit {} failed permanently ({e}); leaving it out",
                            unit.key
                        );
                        tracker.bump()?;
                        Ok(())
                    }
                    Err(e) => {
                        error!("[{step}] unit {} failed via {}: {e}", unit.key, tts.name());
                        Err(e)
                    }
                }
            });
        }

        while let Some(result) = futures.next().await {
            result?;
        }
        Ok(())
    }

    async fn step_audio_combined(&self) -> Result<()> {
        let (source_lang, _) = self.langs();
        let sentences = self.store.sentences(&source_lang)?;
        let words = self.store.rare_words()?;

        let tracker = StepTracker::start(
            Step::AudioCombined,
            0,
            1,
            self.store.clone(),
            self.progress_tx.clone(),
        )?;

        let mut inputs: Vec<SentenceAudio> = Vec::with_capacity(sentences.len());
        for (idx, _) in &sentences {
            let key = idx.to_string();
            let src = self.store.get_artifact(Step::TtsSource.name(), &key)?;
            let tgt = self.store.get_artifact(Step::TtsTarget.name(), &key)?;
            let (Some(src), Some(tgt)) = (src, tgt) else {
                if self.settings.allow_missing_audio {
                    warn!("Sentence {idx} is missing audio; dropping it from the mix");
                    continue;
                }
                return Err(BilangError::Store(format!(
                    "Sentence {idx} has no synthesized audio; re-run the TTS steps"
                )));
            };

            let mut wordcards = Vec::new();
            if self.settings.wordcards {
                for word in words.iter().filter(|w| w.sentence_idx == *idx) {
                    if let Some(artifact) = self.store.get_artifact(
                        Step::TtsWordcards.name(),
                        &wordcard_key(word.sentence_idx, word.word_position),
                    )? {
                        wordcards.push(artifact.path);
                    }
                }
            }

            inputs.push(SentenceAudio {
                idx: *idx,
                source: src.path,
                target: tgt.path,
                wordcards,
            });
        }

        let assembler = AudioAssembler::new(AssemblerConfig {
            pause_between_langs_ms: self.settings.pause_between_langs_ms,
            pause_between_sentences_ms: self.settings.pause_between_sentences_ms,
            pause_before_wordcard_ms: self.settings.pause_before_wordcard_ms,
            pause_between_words_ms: self.settings.pause_between_words_ms,
            speed_source: self.settings.speed_source,
            speed_target: self.settings.speed_target,
            tempo_workers: self.settings.combine_workers,
        });

        let output = self.store.combined_audio_path();
        let timeline = assembler.combine(&inputs, &output).await?;
        self.store.save_timeline(&timeline)?;

        tracker.done.store(1, Ordering::SeqCst);
        tracker.complete()?;
        Ok(())
    }

    async fn step_video(&self) -> Result<()> {
        let (source_lang, target_lang) = self.langs();
        let tracker = StepTracker::start(
            Step::Video,
            0,
            1,
            self.store.clone(),
            self.progress_tx.clone(),
        )?;

        let source_texts: Vec<String> = self
            .store
            .sentences(&source_lang)?
            .into_iter()
            .map(|(_, t)| t)
            .collect();
        let target_texts: Vec<String> = self
            .store
            .sentences(&target_lang)?
            .into_iter()
            .map(|(_, t)| t)
            .collect();

        let mut cards: HashMap<usize, Vec<WordCardEntry>> = HashMap::new();
        for word in self.store.rare_words()? {
            let Some(translation) = word.translation else {
                continue;
            };
            cards.entry(word.sentence_idx).or_default().push(WordCardEntry {
                word: word.surface,
                translation,
            });
        }

        let timeline = self.store.load_timeline()?;
        let subtitles = self.store.subtitles_path();
        let generator = AssGenerator::new(AssConfig {
            width: self.settings.video_width,
            height: self.settings.video_height,
            font_size: self.settings.font_size,
            ..Default::default()
        });
        generator.write(&source_texts, &target_texts, &cards, &timeline, &subtitles)?;

        let video_config = VideoConfig {
            width: self.settings.video_width,
            height: self.settings.video_height,
            fps: self.settings.video_fps,
            background_image: self.store.background_image(),
            ..Default::default()
        };
        let audio = self.store.combined_audio_path();
        let output = self.store.output_video_path();
        tokio::task::spawn_blocking(move || {
            render_video(&audio, &subtitles, &output, &video_config)
        })
        .await
        .map_err(|e| BilangError::Audio(format!("Video task failed: {e}")))??;

        tracker.done.store(1, Ordering::SeqCst);
        tracker.complete()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum TtsChannel {
    Source,
    Target,
}

struct SynthesisUnit {
    key: String,
    text: String,
    lang: String,
}

fn wordcard_key(sentence_idx: usize, word_position: usize) -> String {
    format!("{sentence_idx}_{word_position}")
}
