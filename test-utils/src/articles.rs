//! In-memory article server shared by transport doubles
//!
//! Holds posted articles by message id and knows nothing about the crates
//! under test; each test suite wraps it in its own transport type.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::segments::{message_ids, split};

/// One posted article
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArticle {
    /// Name of the posted file
    pub file_name: String,
    /// Size of the whole posted file
    pub file_size: u64,
    /// Offset of this article's bytes within the file
    pub part_offset: u64,
    /// Whether the article carries `=ypart` style metadata
    pub has_part_header: bool,
    /// Decoded body
    pub body: Vec<u8>,
}

/// Segment entry of a posting, as a manifest would list it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedSegment {
    /// Message id
    pub id: String,
    /// 1-based segment number
    pub number: u32,
    /// Body size
    pub bytes: u64,
}

/// Why a lookup did not return an article
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArticleMiss {
    /// The server does not hold the article
    NotFound,
    /// The article was marked to fail transiently
    Transient,
}

/// Articles keyed by message id
#[derive(Debug, Default)]
pub struct ArticleServer {
    articles: RwLock<HashMap<String, StoredArticle>>,
    transient: RwLock<HashSet<String>>,
    body_fetches: AtomicUsize,
}

impl ArticleServer {
    /// Empty server
    pub fn new() -> Self {
        Self::default()
    }

    /// Post `data` as articles of `segment_size` bytes with ids `<name>-<n>@test`
    pub fn post(
        &self,
        name: &str,
        data: &[u8],
        segment_size: usize,
        part_headers: bool,
    ) -> Vec<PostedSegment> {
        let chunks = split(data, segment_size);
        let ids = message_ids(name, chunks.len());
        let mut articles = self.articles.write();
        let mut segments = Vec::with_capacity(chunks.len());
        for (index, (id, chunk)) in ids.into_iter().zip(chunks).enumerate() {
            segments.push(PostedSegment {
                id: id.clone(),
                number: index as u32 + 1,
                bytes: chunk.len() as u64,
            });
            articles.insert(
                id,
                StoredArticle {
                    file_name: name.to_string(),
                    file_size: data.len() as u64,
                    part_offset: (index * segment_size) as u64,
                    has_part_header: part_headers,
                    body: chunk,
                },
            );
        }
        segments
    }

    /// Drop an article so lookups report it missing
    pub fn remove(&self, id: &str) {
        self.articles.write().remove(id);
    }

    /// Make every lookup of `id` fail transiently
    pub fn fail_transiently(&self, id: &str) {
        self.transient.write().insert(id.to_string());
    }

    /// Look up an article without counting a body fetch
    pub fn get(&self, id: &str) -> Result<StoredArticle, ArticleMiss> {
        if self.transient.read().contains(id) {
            return Err(ArticleMiss::Transient);
        }
        self.articles.read().get(id).cloned().ok_or(ArticleMiss::NotFound)
    }

    /// Look up an article as a body fetch; returns the fetches served so far
    pub fn fetch_body(&self, id: &str) -> Result<(StoredArticle, usize), ArticleMiss> {
        let article = self.get(id)?;
        let served = self.body_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        Ok((article, served))
    }

    /// Bodies served so far
    pub fn body_fetches(&self) -> usize {
        self.body_fetches.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_and_lookup() {
        let server = ArticleServer::new();
        let segments = server.post("a.bin", &[7u8; 2500], 1000, true);
        assert_eq!(
            segments.iter().map(|s| s.bytes).collect::<Vec<_>>(),
            vec![1000, 1000, 500]
        );
        assert_eq!(segments[2].number, 3);

        let Ok((article, served)) = server.fetch_body("a.bin-3@test") else {
            unreachable!("posted article is served");
        };
        assert_eq!(article.part_offset, 2000);
        assert_eq!(article.file_size, 2500);
        assert_eq!(served, 1);

        server.remove("a.bin-1@test");
        server.fail_transiently("a.bin-2@test");
        assert_eq!(server.get("a.bin-1@test"), Err(ArticleMiss::NotFound));
        assert_eq!(server.get("a.bin-2@test"), Err(ArticleMiss::Transient));
        assert_eq!(server.body_fetches(), 1);
    }
}
