//! 章节内容访问
//!
//! 流水线只读取章节原文，不负责小说的增删改；生产环境由平台后端
//! 实现该 trait，内存实现供演示与测试。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::ChapterId;

/// 章节记录
#[derive(Debug, Clone)]
pub struct Chapter {
    pub id: ChapterId,
    pub novel_id: Uuid,
    /// 章节号（1 起）
    pub number: u32,
    pub title: String,
    pub content: String,
}

/// 章节内容源
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn chapter(&self, chapter_id: ChapterId) -> Option<Chapter>;

    /// 小说的全部章节，按章节号升序
    async fn chapters_of(&self, novel_id: Uuid) -> Vec<Chapter>;
}

/// 内存章节库
#[derive(Default)]
pub struct InMemoryContentStore {
    chapters: RwLock<HashMap<ChapterId, Chapter>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, chapter: Chapter) {
        self.chapters.write().await.insert(chapter.id, chapter);
    }

    /// 便捷构造：依序插入正文，返回小说 ID
    pub async fn seed_novel(&self, chapters: Vec<(String, String)>) -> Uuid {
        let novel_id = Uuid::new_v4();
        for (i, (title, content)) in chapters.into_iter().enumerate() {
            self.insert(Chapter {
                id: Uuid::new_v4(),
                novel_id,
                number: i as u32 + 1,
                title,
                content,
            })
            .await;
        }
        novel_id
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn chapter(&self, chapter_id: ChapterId) -> Option<Chapter> {
        self.chapters.read().await.get(&chapter_id).cloned()
    }

    async fn chapters_of(&self, novel_id: Uuid) -> Vec<Chapter> {
        let chapters = self.chapters.read().await;
        let mut out: Vec<Chapter> = chapters
            .values()
            .filter(|c| c.novel_id == novel_id)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.number);
        out
    }
}

/// Arc 别名（引擎各处共享）
pub type SharedContentStore = Arc<dyn ContentStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_chapters_sorted_by_number() {
        let store = InMemoryContentStore::new();
        let novel = store
            .seed_novel(vec![
                ("第一章".to_string(), "内容一".to_string()),
                ("第二章".to_string(), "内容二".to_string()),
            ])
            .await;
        let chapters = store.chapters_of(novel).await;
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].number, 1);
        assert_eq!(chapters[1].title, "第二章");
    }
}
