//! Persistent project state.
//!
//! One directory per project: `meta.json` (identity + step progress), a
//! SQLite database (sentences, translations, rare words, artifact index,
//! word dictionary), and a content-addressed blob directory for TTS audio.
//! The store is the only mutable state shared between pipeline workers; a
//! single connection behind a mutex serializes every write.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::audio::TimelineEntry;
use crate::error::{BilangError, Result};
use crate::rare::RareWord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Pending,
    Running,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StepProgress {
    pub done: usize,
    pub total: usize,
    pub status: Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMeta {
    pub slug: String,
    pub source_lang: String,
    pub target_lang: String,
    pub total_sentences: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub progress: BTreeMap<String, StepProgress>,
}

/// A stored audio artifact reference.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub kind: String,
    pub key: String,
    pub path: PathBuf,
    pub duration_ms: u64,
    pub checksum: String,
}

pub struct ProjectStore {
    dir: PathBuf,
    meta: Mutex<ProjectMeta>,
    conn: Mutex<Connection>,
}

impl ProjectStore {
    /// Create a project directory (or open it if it already exists) under
    /// `root`, with a slug derived from name + language pair.
    pub fn create_or_open(root: &Path, name: &str, source: &str, target: &str) -> Result<Self> {
        let slug = format!("{name}_{source}_{target}");
        let dir = root.join(&slug);
        if dir.join("meta.json").exists() {
            return Self::open(&dir);
        }

        std::fs::create_dir_all(dir.join("blobs"))?;
        std::fs::create_dir_all(dir.join("audio"))?;
        std::fs::create_dir_all(dir.join("video"))?;

        let meta = ProjectMeta {
            slug,
            source_lang: source.to_string(),
            target_lang: target.to_string(),
            total_sentences: 0,
            created_at: Utc::now(),
            progress: BTreeMap::new(),
        };
        write_meta(&dir, &meta)?;

        let conn = open_db(&dir)?;
        debug!("Created project at {}", dir.display());
        Ok(Self {
            dir,
            meta: Mutex::new(meta),
            conn: Mutex::new(conn),
        })
    }

    /// Open an existing project directory.
    pub fn open(dir: &Path) -> Result<Self> {
        let meta_path = dir.join("meta.json");
        let content = std::fs::read_to_string(&meta_path).map_err(|e| {
            BilangError::Input(format!("Not a project directory ({}): {e}", dir.display()))
        })?;
        let meta: ProjectMeta = serde_json::from_str(&content)?;
        let conn = open_db(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            meta: Mutex::new(meta),
            conn: Mutex::new(conn),
        })
    }

    /// Open a project by slug under `root`.
    pub fn open_slug(root: &Path, slug: &str) -> Result<Self> {
        Self::open(&root.join(slug))
    }

    /// Slugs of all projects under `root`, sorted.
    pub fn list(root: &Path) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(root) else {
            return Vec::new();
        };
        let mut slugs: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().join("meta.json").exists())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        slugs.sort();
        slugs
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn meta(&self) -> ProjectMeta {
        self.meta.lock().clone()
    }

    // ------------------------------------------------------------------
    // Original text
    // ------------------------------------------------------------------

    /// Store the original text once; later calls are no-ops.
    pub fn set_original_text(&self, text: &str) -> Result<()> {
        let path = self.dir.join("original.txt");
        if !path.exists() {
            std::fs::write(&path, text)?;
        }
        Ok(())
    }

    pub fn original_text(&self) -> Result<String> {
        std::fs::read_to_string(self.dir.join("original.txt"))
            .map_err(|e| BilangError::Store(format!("Original text missing: {e}")))
    }

    // ------------------------------------------------------------------
    // Sentences and translations
    // ------------------------------------------------------------------

    /// Write all sentence rows for a language in one transaction. Replaces
    /// any existing rows for that language. Writing the source language also
    /// records `total_sentences`.
    pub fn put_sentences(&self, lang: &str, sentences: &[String]) -> Result<()> {
        {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM sentences WHERE lang = ?1", params![lang])?;
            {
                let mut stmt =
                    tx.prepare("INSERT INTO sentences (idx, lang, text) VALUES (?1, ?2, ?3)")?;
                for (idx, text) in sentences.iter().enumerate() {
                    stmt.execute(params![idx as i64, lang, text])?;
                }
            }
            tx.commit()?;
        }

        let is_source = { self.meta.lock().source_lang == lang };
        if is_source {
            let mut meta = self.meta.lock();
            meta.total_sentences = sentences.len();
            write_meta(&self.dir, &meta)?;
        }
        Ok(())
    }

    /// Sentences for a language, ordered by index.
    pub fn sentences(&self, lang: &str) -> Result<Vec<(usize, String)>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT idx, text FROM sentences WHERE lang = ?1 ORDER BY idx")?;
        let rows = stmt
            .query_map(params![lang], |row| {
                Ok((row.get::<_, i64>(0)? as usize, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Upsert the translation (target-language row) for one sentence.
    pub fn put_translation(&self, idx: usize, text: &str) -> Result<()> {
        let lang = { self.meta.lock().target_lang.clone() };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sentences (idx, lang, text) VALUES (?1, ?2, ?3)
             ON CONFLICT (idx, lang) DO UPDATE SET text = excluded.text",
            params![idx as i64, lang, text],
        )?;
        Ok(())
    }

    pub fn get_translation(&self, idx: usize) -> Result<Option<String>> {
        let lang = { self.meta.lock().target_lang.clone() };
        let conn = self.conn.lock();
        let text = conn
            .query_row(
                "SELECT text FROM sentences WHERE idx = ?1 AND lang = ?2",
                params![idx as i64, lang],
                |row| row.get(0),
            )
            .optional()?;
        Ok(text)
    }

    // ------------------------------------------------------------------
    // Rare words
    // ------------------------------------------------------------------

    /// Replace the rare-word list for one sentence.
    pub fn put_rare_words(&self, idx: usize, words: &[RareWord]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM rare_words WHERE sentence_idx = ?1",
            params![idx as i64],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO rare_words
                 (sentence_idx, word_position, surface, lemma, zipf, translation)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for word in words {
                stmt.execute(params![
                    idx as i64,
                    word.word_position as i64,
                    word.surface,
                    word.lemma,
                    word.zipf,
                    word.translation,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// All rare words, ordered by sentence then position.
    pub fn rare_words(&self) -> Result<Vec<RareWord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT sentence_idx, word_position, surface, lemma, zipf, translation
             FROM rare_words ORDER BY sentence_idx, word_position",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(RareWord {
                    sentence_idx: row.get::<_, i64>(0)? as usize,
                    word_position: row.get::<_, i64>(1)? as usize,
                    surface: row.get(2)?,
                    lemma: row.get(3)?,
                    zipf: row.get(4)?,
                    translation: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_rare_word_translation(
        &self,
        sentence_idx: usize,
        word_position: usize,
        translation: &str,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE rare_words SET translation = ?3
             WHERE sentence_idx = ?1 AND word_position = ?2",
            params![sentence_idx as i64, word_position as i64, translation],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Artifacts
    // ------------------------------------------------------------------

    /// Content-addressed blob path for a synthesis input. Identical
    /// (text, lang, voice) always maps to the same file, which makes the
    /// filesystem the TTS cache.
    pub fn blob_path(&self, text: &str, lang: &str, voice_key: &str) -> PathBuf {
        let hash = content_hash(&format!("{text}|{lang}|{voice_key}"));
        self.dir.join("blobs").join(format!("tts_{hash}.mp3"))
    }

    /// Record an artifact row. The checksum is computed from the file bytes.
    pub fn put_artifact(&self, kind: &str, key: &str, path: &Path, duration_ms: u64) -> Result<()> {
        let bytes = std::fs::read(path)?;
        let checksum = content_hash_bytes(&bytes);
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO artifacts (kind, key, path, duration_ms, checksum)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (kind, key) DO UPDATE SET
               path = excluded.path,
               duration_ms = excluded.duration_ms,
               checksum = excluded.checksum",
            params![
                kind,
                key,
                path.to_string_lossy(),
                duration_ms as i64,
                checksum
            ],
        )?;
        Ok(())
    }

    pub fn get_artifact(&self, kind: &str, key: &str) -> Result<Option<Artifact>> {
        let conn = self.conn.lock();
        let artifact = conn
            .query_row(
                "SELECT path, duration_ms, checksum FROM artifacts
                 WHERE kind = ?1 AND key = ?2",
                params![kind, key],
                |row| {
                    Ok(Artifact {
                        kind: kind.to_string(),
                        key: key.to_string(),
                        path: PathBuf::from(row.get::<_, String>(0)?),
                        duration_ms: row.get::<_, i64>(1)? as u64,
                        checksum: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(artifact)
    }

    /// An artifact counts as present only when its row exists and the file
    /// it points to is non-empty. Resume re-derives pending work from this.
    pub fn artifact_present(&self, kind: &str, key: &str) -> bool {
        match self.get_artifact(kind, key) {
            Ok(Some(artifact)) => artifact
                .path
                .metadata()
                .map(|m| m.len() > 0)
                .unwrap_or(false),
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Word dictionary cache
    // ------------------------------------------------------------------

    pub fn dictionary_get(&self, word: &str, from: &str, to: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let hit = conn
            .query_row(
                "SELECT translation FROM dictionary
                 WHERE word = ?1 AND source_lang = ?2 AND target_lang = ?3",
                params![word, from, to],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit)
    }

    pub fn dictionary_put(&self, word: &str, from: &str, to: &str, translation: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO dictionary (word, source_lang, target_lang, translation)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (word, source_lang, target_lang)
               DO UPDATE SET translation = excluded.translation",
            params![word, from, to, translation],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Step progress
    // ------------------------------------------------------------------

    pub fn progress(&self, step: &str) -> StepProgress {
        self.meta
            .lock()
            .progress
            .get(step)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_progress(&self, step: &str, done: usize, total: usize, status: Status) -> Result<()> {
        let mut meta = self.meta.lock();
        meta.progress
            .insert(step.to_string(), StepProgress { done, total, status });
        write_meta(&self.dir, &meta)
    }

    /// Invalidate a step without touching upstream artifacts; the
    /// content-addressed files stay in place and get reused on re-run.
    pub fn reset_step(&self, step: &str) -> Result<()> {
        let mut meta = self.meta.lock();
        meta.progress.insert(step.to_string(), StepProgress::default());
        write_meta(&self.dir, &meta)
    }

    // ------------------------------------------------------------------
    // Timeline and output paths
    // ------------------------------------------------------------------

    pub fn save_timeline(&self, timeline: &[TimelineEntry]) -> Result<()> {
        let json = serde_json::to_string_pretty(timeline)?;
        std::fs::write(self.dir.join("timeline.json"), json)?;
        Ok(())
    }

    pub fn load_timeline(&self) -> Result<Vec<TimelineEntry>> {
        let content = std::fs::read_to_string(self.dir.join("timeline.json"))
            .map_err(|e| BilangError::Store(format!("Timeline missing: {e}")))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn combined_audio_path(&self) -> PathBuf {
        self.dir.join("audio").join("combined.mp3")
    }

    pub fn subtitles_path(&self) -> PathBuf {
        self.dir.join("video").join("subtitles.ass")
    }

    pub fn output_video_path(&self) -> PathBuf {
        self.dir.join("video").join("final.mp4")
    }

    /// Optional background image dropped into the project by the user.
    pub fn background_image(&self) -> Option<PathBuf> {
        ["background.png", "background.jpg"]
            .iter()
            .map(|name| self.dir.join("video").join(name))
            .find(|p| p.exists())
    }
}

fn open_db(dir: &Path) -> Result<Connection> {
    let conn = Connection::open(dir.join("project.db"))?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;

        CREATE TABLE IF NOT EXISTS sentences (
            idx   INTEGER NOT NULL,
            lang  TEXT NOT NULL,
            text  TEXT NOT NULL,
            PRIMARY KEY (idx, lang)
        );

        CREATE TABLE IF NOT EXISTS rare_words (
            sentence_idx   INTEGER NOT NULL,
            word_position  INTEGER NOT NULL,
            surface        TEXT NOT NULL,
            lemma          TEXT NOT NULL,
            zipf           REAL NOT NULL,
            translation    TEXT,
            PRIMARY KEY (sentence_idx, word_position)
        );

        CREATE TABLE IF NOT EXISTS artifacts (
            kind         TEXT NOT NULL,
            key          TEXT NOT NULL,
            path         TEXT NOT NULL,
            duration_ms  INTEGER NOT NULL,
            checksum     TEXT NOT NULL,
            PRIMARY KEY (kind, key)
        );

        CREATE TABLE IF NOT EXISTS dictionary (
            word         TEXT NOT NULL,
            source_lang  TEXT NOT NULL,
            target_lang  TEXT NOT NULL,
            translation  TEXT NOT NULL,
            PRIMARY KEY (word, source_lang, target_lang)
        );
        ",
    )?;
    Ok(conn)
}

/// Crash-safe meta write: temp file in the same directory, then rename.
fn write_meta(dir: &Path, meta: &ProjectMeta) -> Result<()> {
    let json = serde_json::to_string_pretty(meta)?;
    let tmp = dir.join("meta.json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, dir.join("meta.json"))?;
    Ok(())
}

/// Stable content hash (first 16 hex chars of SHA-256). Must not vary
/// across runs or platforms: the blob paths derived from it are the cache.
pub fn content_hash(input: &str) -> String {
    content_hash_bytes(input.as_bytes())
}

fn content_hash_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, ProjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::create_or_open(dir.path(), "test", "ru", "es").unwrap();
        (dir, store)
    }

    #[test]
    fn test_create_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ProjectStore::create_or_open(dir.path(), "book", "ru", "es").unwrap();
            assert_eq!(store.meta().slug, "book_ru_es");
        }
        let store = ProjectStore::open_slug(dir.path(), "book_ru_es").unwrap();
        assert_eq!(store.meta().source_lang, "ru");
        assert_eq!(store.meta().target_lang, "es");
    }

    #[test]
    fn test_original_text_idempotent() {
        let (_dir, store) = temp_store();
        store.set_original_text("first").unwrap();
        store.set_original_text("second").unwrap();
        assert_eq!(store.original_text().unwrap(), "first");
    }

    #[test]
    fn test_put_sentences_sets_total() {
        let (_dir, store) = temp_store();
        let sentences = vec!["Раз.".to_string(), "Два.".to_string()];
        store.put_sentences("ru", &sentences).unwrap();
        assert_eq!(store.meta().total_sentences, 2);

        let rows = store.sentences("ru").unwrap();
        assert_eq!(rows, vec![(0, "Раз.".to_string()), (1, "Два.".to_string())]);
    }

    #[test]
    fn test_target_sentences_do_not_change_total() {
        let (_dir, store) = temp_store();
        store.put_sentences("ru", &["Раз.".to_string()]).unwrap();
        store
            .put_sentences("es", &["Uno.".to_string(), "Dos.".to_string()])
            .unwrap();
        assert_eq!(store.meta().total_sentences, 1);
    }

    #[test]
    fn test_translation_roundtrip_and_upsert() {
        let (_dir, store) = temp_store();
        assert_eq!(store.get_translation(0).unwrap(), None);
        store.put_translation(0, "Hola.").unwrap();
        store.put_translation(0, "Buenas.").unwrap();
        assert_eq!(store.get_translation(0).unwrap(), Some("Buenas.".to_string()));
    }

    #[test]
    fn test_rare_words_roundtrip() {
        let (_dir, store) = temp_store();
        let words = vec![RareWord {
            sentence_idx: 3,
            word_position: 0,
            surface: "serendipia".to_string(),
            lemma: "serendipia".to_string(),
            zipf: 1.9,
            translation: None,
        }];
        store.put_rare_words(3, &words).unwrap();
        store.set_rare_word_translation(3, 0, "серендипность").unwrap();

        let all = store.rare_words().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].translation.as_deref(), Some("серендипность"));
    }

    #[test]
    fn test_artifact_presence_requires_file() {
        let (dir, store) = temp_store();
        let audio = dir.path().join("clip.mp3");

        assert!(!store.artifact_present("tts_source", "0"));

        std::fs::write(&audio, b"not-really-mp3-bytes").unwrap();
        store.put_artifact("tts_source", "0", &audio, 1234).unwrap();
        assert!(store.artifact_present("tts_source", "0"));

        std::fs::remove_file(&audio).unwrap();
        assert!(!store.artifact_present("tts_source", "0"));
    }

    #[test]
    fn test_blob_path_stable() {
        let (_dir, store) = temp_store();
        let a = store.blob_path("Привет", "ru", "google_cloud");
        let b = store.blob_path("Привет", "ru", "google_cloud");
        let c = store.blob_path("Привет", "es", "google_cloud");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.file_name().unwrap().to_string_lossy().starts_with("tts_"));
    }

    #[test]
    fn test_progress_lifecycle() {
        let (_dir, store) = temp_store();
        assert_eq!(store.progress("translations").status, Status::Pending);

        store
            .set_progress("translations", 3, 10, Status::Running)
            .unwrap();
        let p = store.progress("translations");
        assert_eq!((p.done, p.total), (3, 10));
        assert_eq!(p.status, Status::Running);

        store.reset_step("translations").unwrap();
        assert_eq!(store.progress("translations").status, Status::Pending);
    }

    #[test]
    fn test_progress_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ProjectStore::create_or_open(dir.path(), "p", "ru", "es").unwrap();
            store.set_progress("tts_source", 5, 9, Status::Failed).unwrap();
        }
        let store = ProjectStore::open_slug(dir.path(), "p_ru_es").unwrap();
        let p = store.progress("tts_source");
        assert_eq!((p.done, p.total), (5, 9));
        assert_eq!(p.status, Status::Failed);
    }

    #[test]
    fn test_dictionary_cache() {
        let (_dir, store) = temp_store();
        assert_eq!(store.dictionary_get("nave", "es", "ru").unwrap(), None);
        store.dictionary_put("nave", "es", "ru", "корабль").unwrap();
        assert_eq!(
            store.dictionary_get("nave", "es", "ru").unwrap(),
            Some("корабль".to_string())
        );
    }

    #[test]
    fn test_list_projects() {
        let dir = tempfile::tempdir().unwrap();
        ProjectStore::create_or_open(dir.path(), "b", "ru", "es").unwrap();
        ProjectStore::create_or_open(dir.path(), "a", "en", "es").unwrap();
        assert_eq!(ProjectStore::list(dir.path()), vec!["a_en_es", "b_ru_es"]);
    }

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_eq!(content_hash("abc").len(), 16);
        assert_ne!(content_hash("abc"), content_hash("abd"));
    }
}
