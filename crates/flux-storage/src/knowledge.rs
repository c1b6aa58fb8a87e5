use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

const CHUNK_MAX_CHARS: usize = 500;

const STOP_WORDS: &[&str] = &[
    "은", "는", "이", "가", "을", "를", "의", "에", "에서", "로", "으로", "와", "과", "도", "만",
    "부터", "까지", "에게", "한테", "께", "the", "a", "an", "is", "are", "was", "were", "be",
    "been", "being", "in", "on", "at", "of", "and", "or", "to", "for", "with", "by", "from",
    "as", "into", "about", "that", "this", "it", "not", "but",
];

/// Longest-match-first, so "에서는" is tried before "에서".
const KOREAN_SUFFIXES: &[&str] = &[
    "에서는", "으로는", "에서", "으로", "부터", "까지", "에게", "한테", "이나", "이란", "이라",
    "은", "는", "이", "가", "을", "를", "의", "에", "로", "와", "과", "도", "만", "께",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: usize,
    pub text: String,
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: String,
    pub title: String,
    pub content: String,
    pub source: String,
    pub created_at: String,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexedChunk {
    tf: HashMap<String, f64>,
    doc_id: String,
    chunk_id: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KnowledgeIndex {
    version: u32,
    doc_count: usize,
    chunk_count: usize,
    idf: HashMap<String, f64>,
    chunks: HashMap<String, IndexedChunk>,
}

impl Default for KnowledgeIndex {
    fn default() -> Self {
        Self {
            version: 1,
            doc_count: 0,
            chunk_count: 0,
            idf: HashMap::new(),
            chunks: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub doc_id: String,
    pub title: String,
    pub chunk: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeStats {
    pub doc_count: usize,
    pub chunk_count: usize,
    pub index_size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub doc_id: String,
    pub title: String,
    pub source: String,
    pub created_at: String,
    pub chunk_count: usize,
}

/// TF-IDF document store and similarity search engine.
/// JSON-file-backed, one document per file under `docs/`, plus a
/// single `index.json` holding TF per chunk and corpus-wide IDF.
/// Grounded on the dependency-free Python knowledge base this was
/// distilled from; the access pattern mirrors `skynet-agent`'s
/// `Mutex`-guarded single-process store.
pub struct KnowledgeBase {
    docs_dir: PathBuf,
    index_path: PathBuf,
    lock: Mutex<()>,
}

impl KnowledgeBase {
    pub fn new(knowledge_dir: impl AsRef<Path>) -> Result<Self> {
        let knowledge_dir = knowledge_dir.as_ref().to_path_buf();
        let docs_dir = knowledge_dir.join("docs");
        fs::create_dir_all(&docs_dir)?;
        Ok(Self {
            docs_dir,
            index_path: knowledge_dir.join("index.json"),
            lock: Mutex::new(()),
        })
    }

    pub fn add_document(&self, title: &str, content: &str, source: &str) -> Result<(String, usize)> {
        let _guard = self.lock.lock().unwrap();
        let doc_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let chunks: Vec<Chunk> = split_chunks(content)
            .into_iter()
            .enumerate()
            .map(|(chunk_id, text)| {
                let tokens = tokenize(&text);
                Chunk { chunk_id, text, tokens }
            })
            .collect();

        let doc = KnowledgeDocument {
            id: doc_id.clone(),
            title: title.to_string(),
            content: content.to_string(),
            source: source.to_string(),
            created_at: now,
            chunks: chunks.clone(),
        };

        self.write_doc(&doc)?;
        self.add_to_index(&doc_id, &chunks)?;

        Ok((doc_id, chunks.len()))
    }

    pub fn remove_document(&self, doc_id: &str) -> Result<bool> {
        let _guard = self.lock.lock().unwrap();
        let path = self.doc_path(doc_id)?;
        if !path.exists() {
            return Ok(false);
        }
        self.remove_from_index(doc_id)?;
        fs::remove_file(&path)?;
        Ok(true)
    }

    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let index = self.load_index()?;
        if index.chunks.is_empty() {
            return Ok(Vec::new());
        }

        let query_tf = compute_tf(&query_tokens);
        let query_vec: HashMap<&str, f64> = query_tf
            .iter()
            .map(|(term, tf)| (term.as_str(), tf * index.idf.get(term).copied().unwrap_or(0.0)))
            .collect();

        let mut scored: Vec<(String, usize, f64)> = Vec::new();
        for chunk in index.chunks.values() {
            let chunk_vec: HashMap<&str, f64> = chunk
                .tf
                .iter()
                .map(|(term, tf)| (term.as_str(), tf * index.idf.get(term).copied().unwrap_or(0.0)))
                .collect();
            let score = cosine_similarity(&query_vec, &chunk_vec);
            if score > 0.0 {
                scored.push((chunk.doc_id.clone(), chunk.chunk_id, score));
            }
        }

        scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        let mut doc_cache: HashMap<String, Option<KnowledgeDocument>> = HashMap::new();
        let mut results = Vec::new();
        for (doc_id, chunk_id, score) in scored {
            let doc = doc_cache
                .entry(doc_id.clone())
                .or_insert_with(|| self.read_doc(&doc_id).ok().flatten());
            let Some(doc) = doc else { continue };

            let chunk_text = doc
                .chunks
                .iter()
                .find(|c| c.chunk_id == chunk_id)
                .map(|c| c.text.clone())
                .unwrap_or_default();

            results.push(SearchResult {
                doc_id,
                title: doc.title.clone(),
                chunk: chunk_text,
                score: (score * 10000.0).round() / 10000.0,
            });
        }

        Ok(results)
    }

    /// Concatenates top search results into a context string capped at
    /// `max_chars`, for splicing relevant knowledge into a system prompt.
    pub fn get_context(&self, query: &str, max_chars: usize) -> Result<String> {
        let results = self.search(query, 10)?;
        if results.is_empty() {
            return Ok(String::new());
        }

        let mut parts = Vec::new();
        let mut total_len = 0usize;
        for r in results {
            let entry = format!("[{}] {}", r.title, r.chunk);
            if total_len + entry.len() + 1 > max_chars {
                let remaining = max_chars.saturating_sub(total_len);
                if remaining > 50 {
                    let end = floor_char_boundary(&entry, remaining);
                    parts.push(entry[..end].to_string());
                }
                break;
            }
            total_len += entry.len() + 1;
            parts.push(entry);
        }

        Ok(parts.join("\n"))
    }

    pub fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let mut summaries = Vec::new();
        if !self.docs_dir.is_dir() {
            return Ok(summaries);
        }
        for entry in fs::read_dir(&self.docs_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(Some(doc)) = self.read_doc_at(&path) {
                summaries.push(DocumentSummary {
                    doc_id: doc.id,
                    title: doc.title,
                    source: doc.source,
                    created_at: doc.created_at,
                    chunk_count: doc.chunks.len(),
                });
            }
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    pub fn get_stats(&self) -> Result<KnowledgeStats> {
        let index = self.load_index()?;
        let index_size = fs::metadata(&self.index_path).map(|m| m.len()).unwrap_or(0);
        Ok(KnowledgeStats {
            doc_count: index.doc_count,
            chunk_count: index.chunk_count,
            index_size,
        })
    }

    /// Re-derives the index from documents on disk, discarding whatever
    /// was there before. Used for recovery after manual document edits.
    pub fn rebuild_index(&self) -> Result<(usize, usize)> {
        let _guard = self.lock.lock().unwrap();
        let mut index = KnowledgeIndex::default();

        if !self.docs_dir.is_dir() {
            self.save_index(&index)?;
            return Ok((0, 0));
        }

        let mut doc_ids = std::collections::HashSet::new();
        for entry in fs::read_dir(&self.docs_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(Some(doc)) = self.read_doc_at(&path) else { continue };
            if doc.id.is_empty() {
                continue;
            }
            doc_ids.insert(doc.id.clone());
            for chunk in &doc.chunks {
                let key = format!("{}:{}", doc.id, chunk.chunk_id);
                index.chunks.insert(
                    key,
                    IndexedChunk {
                        tf: compute_tf(&chunk.tokens),
                        doc_id: doc.id.clone(),
                        chunk_id: chunk.chunk_id,
                    },
                );
            }
        }

        index.idf = compute_idf(&index.chunks);
        index.doc_count = doc_ids.len();
        index.chunk_count = index.chunks.len();
        self.save_index(&index)?;

        Ok((index.doc_count, index.chunk_count))
    }

    fn doc_path(&self, doc_id: &str) -> Result<PathBuf> {
        Ok(self.docs_dir.join(format!("{doc_id}.json")))
    }

    fn write_doc(&self, doc: &KnowledgeDocument) -> Result<()> {
        let path = self.doc_path(&doc.id)?;
        fs::write(path, serde_json::to_string_pretty(doc)?)?;
        Ok(())
    }

    fn read_doc(&self, doc_id: &str) -> Result<Option<KnowledgeDocument>> {
        let path = self.doc_path(doc_id)?;
        self.read_doc_at(&path)
    }

    fn read_doc_at(&self, path: &Path) -> Result<Option<KnowledgeDocument>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw).ok())
    }

    fn load_index(&self) -> Result<KnowledgeIndex> {
        if !self.index_path.exists() {
            return Ok(KnowledgeIndex::default());
        }
        let raw = fs::read_to_string(&self.index_path)?;
        Ok(serde_json::from_str(&raw).unwrap_or_default())
    }

    fn save_index(&self, index: &KnowledgeIndex) -> Result<()> {
        fs::write(&self.index_path, serde_json::to_string_pretty(index)?)?;
        Ok(())
    }

    fn add_to_index(&self, doc_id: &str, chunks: &[Chunk]) -> Result<()> {
        let mut index = self.load_index()?;
        for chunk in chunks {
            let key = format!("{doc_id}:{}", chunk.chunk_id);
            index.chunks.insert(
                key,
                IndexedChunk {
                    tf: compute_tf(&chunk.tokens),
                    doc_id: doc_id.to_string(),
                    chunk_id: chunk.chunk_id,
                },
            );
        }
        index.idf = compute_idf(&index.chunks);
        index.chunk_count = index.chunks.len();
        index.doc_count = index
            .chunks
            .values()
            .map(|c| c.doc_id.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();
        self.save_index(&index)
    }

    fn remove_from_index(&self, doc_id: &str) -> Result<()> {
        let mut index = self.load_index()?;
        index.chunks.retain(|_, v| v.doc_id != doc_id);
        index.idf = compute_idf(&index.chunks);
        index.chunk_count = index.chunks.len();
        index.doc_count = index
            .chunks
            .values()
            .map(|c| c.doc_id.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();
        self.save_index(&index)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut tokens = Vec::new();
    let mut current = String::new();

    for ch in lower.chars() {
        if is_token_char(ch) {
            current.push(ch);
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
        .into_iter()
        .filter_map(|tok| {
            let stripped = strip_korean_suffix(&tok);
            if stripped.is_empty() || STOP_WORDS.contains(&stripped.as_str()) {
                None
            } else {
                Some(stripped)
            }
        })
        .collect()
}

fn is_token_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ('\u{AC00}'..='\u{D7A3}').contains(&ch)
}

fn is_hangul(ch: char) -> bool {
    ('\u{AC00}'..='\u{D7A3}').contains(&ch)
}

fn strip_korean_suffix(token: &str) -> String {
    if !token.chars().any(is_hangul) {
        return token.to_string();
    }
    let chars: Vec<char> = token.chars().collect();
    for suffix in KOREAN_SUFFIXES {
        let suffix_chars: Vec<char> = suffix.chars().collect();
        if chars.len() > suffix_chars.len() && chars.ends_with(&suffix_chars) {
            let kept = &chars[..chars.len() - suffix_chars.len()];
            return kept.iter().collect();
        }
    }
    token.to_string()
}

/// Paragraph split on blank lines; paragraphs over `CHUNK_MAX_CHARS`
/// are further split on sentence-ending punctuation.
fn split_chunks(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let trimmed = text.trim();
    let paragraphs = split_blank_lines(trimmed);

    for para in paragraphs {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        if para.chars().count() <= CHUNK_MAX_CHARS {
            chunks.push(para.to_string());
            continue;
        }

        let sentences = split_sentences(para);
        let mut current = String::new();
        for sent in sentences {
            if !current.is_empty() && current.chars().count() + sent.chars().count() + 1 > CHUNK_MAX_CHARS {
                chunks.push(current.trim().to_string());
                current = sent;
            } else if current.is_empty() {
                current = sent;
            } else {
                current.push(' ');
                current.push_str(&sent);
            }
        }
        if !current.trim().is_empty() {
            chunks.push(current.trim().to_string());
        }
    }

    chunks.into_iter().filter(|c| !c.trim().is_empty()).collect()
}

fn split_blank_lines(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut blank_run = 0;

    for line in text.split('\n') {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run >= 1 && !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
        } else {
            blank_run = 0;
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?' | '。') {
            sentences.push(std::mem::take(&mut current));
        }
    }
    if !current.trim().is_empty() {
        sentences.push(current);
    }

    sentences.into_iter().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

fn compute_tf(tokens: &[String]) -> HashMap<String, f64> {
    if tokens.is_empty() {
        return HashMap::new();
    }
    let mut counts: HashMap<String, usize> = HashMap::new();
    for tok in tokens {
        *counts.entry(tok.clone()).or_insert(0) += 1;
    }
    let len = tokens.len() as f64;
    counts.into_iter().map(|(term, count)| (term, count as f64 / len)).collect()
}

fn compute_idf(chunks: &HashMap<String, IndexedChunk>) -> HashMap<String, f64> {
    let n = chunks.len();
    if n == 0 {
        return HashMap::new();
    }
    let mut df: HashMap<String, usize> = HashMap::new();
    for chunk in chunks.values() {
        for term in chunk.tf.keys() {
            *df.entry(term.clone()).or_insert(0) += 1;
        }
    }
    df.into_iter()
        .map(|(term, freq)| (term, ((n as f64 + 1.0) / (1.0 + freq as f64)).ln()))
        .collect()
}

fn cosine_similarity(a: &HashMap<&str, f64>, b: &HashMap<&str, f64>) -> f64 {
    let dot: f64 = a.iter().filter_map(|(term, v)| b.get(term).map(|bv| v * bv)).sum();
    if dot == 0.0 {
        return 0.0;
    }
    let norm_a = a.values().map(|v| v * v).sum::<f64>().sqrt();
    let norm_b = b.values().map(|v| v * v).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn tokenize_strips_korean_particles_and_stopwords() {
        let tokens = tokenize("고양이는 집에서 잔다 the cat");
        assert!(tokens.contains(&"고양".to_string()));
        assert!(!tokens.contains(&"the".to_string()));
    }

    #[test]
    fn add_and_search_round_trips() {
        let dir = tempdir().unwrap();
        let kb = KnowledgeBase::new(dir.path()).unwrap();

        let (doc_id, chunk_count) = kb
            .add_document("Rust Guide", "Rust is a systems programming language. It guarantees memory safety.", "user")
            .unwrap();
        assert_eq!(chunk_count, 1);

        let results = kb.search("memory safety", 5).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].doc_id, doc_id);
    }

    #[test]
    fn remove_document_drops_from_index() {
        let dir = tempdir().unwrap();
        let kb = KnowledgeBase::new(dir.path()).unwrap();
        let (doc_id, _) = kb.add_document("Doc", "Some searchable paragraph text here.", "user").unwrap();

        assert!(kb.remove_document(&doc_id).unwrap());
        let results = kb.search("searchable", 5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn rebuild_index_reconstructs_from_documents() {
        let dir = tempdir().unwrap();
        let kb = KnowledgeBase::new(dir.path()).unwrap();
        kb.add_document("Doc", "Another searchable paragraph about rust ownership.", "user").unwrap();

        let (doc_count, chunk_count) = kb.rebuild_index().unwrap();
        assert_eq!(doc_count, 1);
        assert_eq!(chunk_count, 1);
    }
}
