//! 角色映射注册表
//!
//! 并发策略：外层映射表读锁 + 条目级写锁，upsert 只独占单个
//! (project, name) 条目；读取对一致快照克隆，不持锁返回。
//! 合并规则：已验证条目不被未验证候选覆盖（候选进 alternative_names）；
//! 未验证 vs 未验证取先写者，保证并发章节译名收敛到同一条目。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::model::{CharacterMapping, MappingCandidate, ProjectId};

type Key = (ProjectId, String);

/// 合并结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// 新条目插入
    Inserted,
    /// 已有条目胜出，候选被丢弃（记入别名）
    KeptExisting,
    /// 候选覆盖了已有未验证条目
    Replaced,
}

/// 项目范围的角色映射注册表
#[derive(Default)]
pub struct CharacterMappingRegistry {
    entries: RwLock<HashMap<Key, Arc<RwLock<CharacterMapping>>>>,
}

impl CharacterMappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 查询单个映射（快照）
    pub async fn resolve(&self, project_id: ProjectId, name: &str) -> Option<CharacterMapping> {
        let entry = {
            let entries = self.entries.read().await;
            entries.get(&(project_id, name.to_string())).cloned()
        };
        match entry {
            Some(e) => Some(e.read().await.clone()),
            None => None,
        }
    }

    /// 原子 upsert：返回最终生效的映射与合并结果
    pub async fn propose_or_merge(
        &self,
        project_id: ProjectId,
        candidate: &MappingCandidate,
    ) -> (CharacterMapping, MergeOutcome) {
        let key = (project_id, candidate.original_name.clone());

        // 先尝试读路径拿到既有条目，未命中再短暂持外层写锁插入
        let entry = {
            let entries = self.entries.read().await;
            entries.get(&key).cloned()
        };
        let entry = match entry {
            Some(e) => e,
            None => {
                let mut entries = self.entries.write().await;
                match entries.get(&key) {
                    // 插入竞争：别人先到，走合并路径
                    Some(e) => e.clone(),
                    None => {
                        let mapping = CharacterMapping::from_candidate(project_id, candidate);
                        let snapshot = mapping.clone();
                        entries.insert(key, Arc::new(RwLock::new(mapping)));
                        return (snapshot, MergeOutcome::Inserted);
                    }
                }
            }
        };

        // 条目级独占区：只有同名提案在此互斥
        let mut mapping = entry.write().await;
        mapping.appearance_frequency += 1;
        mapping.updated_at = chrono::Utc::now();

        let candidate_verified = !candidate.auto_detected;
        let outcome = if candidate_verified && !mapping.is_verified {
            // 人工候选覆盖自动检测条目
            if mapping.translated_name != candidate.translated_name {
                let old = std::mem::replace(
                    &mut mapping.translated_name,
                    candidate.translated_name.clone(),
                );
                push_alternative(&mut mapping.alternative_names, old);
            }
            mapping.confidence = candidate.confidence.clamp(0.0, 1.0);
            mapping.is_verified = true;
            mapping.auto_detected = false;
            MergeOutcome::Replaced
        } else {
            // 已验证条目或先写者胜出；候选留档
            if mapping.translated_name != candidate.translated_name {
                push_alternative(
                    &mut mapping.alternative_names,
                    candidate.translated_name.clone(),
                );
            }
            MergeOutcome::KeptExisting
        };

        (mapping.clone(), outcome)
    }

    /// 人工验证：标记 is_verified，可同时改写译名
    pub async fn verify(
        &self,
        project_id: ProjectId,
        name: &str,
        translated_name: Option<String>,
    ) -> Option<CharacterMapping> {
        let entry = {
            let entries = self.entries.read().await;
            entries.get(&(project_id, name.to_string())).cloned()
        }?;

        let mut mapping = entry.write().await;
        if let Some(new_name) = translated_name {
            if mapping.translated_name != new_name {
                let old = std::mem::replace(&mut mapping.translated_name, new_name);
                push_alternative(&mut mapping.alternative_names, old);
            }
        }
        mapping.is_verified = true;
        mapping.confidence = 1.0;
        mapping.updated_at = chrono::Utc::now();
        Some(mapping.clone())
    }

    /// 项目内全部映射，按出现频率降序、同频按原名排序
    pub async fn list(&self, project_id: ProjectId) -> Vec<CharacterMapping> {
        let entries: Vec<_> = {
            let map = self.entries.read().await;
            map.iter()
                .filter(|((pid, _), _)| *pid == project_id)
                .map(|(_, e)| e.clone())
                .collect()
        };

        let mut out = Vec::with_capacity(entries.len());
        for e in entries {
            out.push(e.read().await.clone());
        }
        out.sort_by(|a, b| {
            b.appearance_frequency
                .cmp(&a.appearance_frequency)
                .then_with(|| a.original_name.cmp(&b.original_name))
        });
        out
    }
}

fn push_alternative(alternatives: &mut Vec<String>, name: String) {
    if !alternatives.contains(&name) {
        alternatives.push(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn candidate(name: &str, translated: &str) -> MappingCandidate {
        MappingCandidate {
            original_name: name.to_string(),
            translated_name: translated.to_string(),
            character_type: Default::default(),
            confidence: 0.8,
            auto_detected: true,
        }
    }

    #[tokio::test]
    async fn test_first_writer_wins() {
        let registry = CharacterMappingRegistry::new();
        let project = Uuid::new_v4();

        let (first, o1) = registry
            .propose_or_merge(project, &candidate("王磊", "Wang Lei"))
            .await;
        assert_eq!(o1, MergeOutcome::Inserted);
        assert_eq!(first.translated_name, "Wang Lei");

        let (second, o2) = registry
            .propose_or_merge(project, &candidate("王磊", "Leo Wang"))
            .await;
        assert_eq!(o2, MergeOutcome::KeptExisting);
        // 第二次提案拿到的是先写者的译名，落选候选留在别名里
        assert_eq!(second.translated_name, "Wang Lei");
        assert_eq!(second.alternative_names, vec!["Leo Wang".to_string()]);
        assert_eq!(second.appearance_frequency, 2);
    }

    #[tokio::test]
    async fn test_verified_never_overwritten() {
        let registry = CharacterMappingRegistry::new();
        let project = Uuid::new_v4();

        registry
            .propose_or_merge(project, &candidate("林雪", "Lin Xue"))
            .await;
        registry.verify(project, "林雪", None).await.unwrap();

        let (kept, outcome) = registry
            .propose_or_merge(project, &candidate("林雪", "Snow Lin"))
            .await;
        assert_eq!(outcome, MergeOutcome::KeptExisting);
        assert!(kept.is_verified);
        assert_eq!(kept.translated_name, "Lin Xue");
    }

    #[tokio::test]
    async fn test_manual_candidate_replaces_auto() {
        let registry = CharacterMappingRegistry::new();
        let project = Uuid::new_v4();

        registry
            .propose_or_merge(project, &candidate("青云宗", "Qingyun Sect"))
            .await;

        let manual = MappingCandidate {
            auto_detected: false,
            confidence: 1.0,
            ..candidate("青云宗", "Azure Cloud Sect")
        };
        let (merged, outcome) = registry.propose_or_merge(project, &manual).await;
        assert_eq!(outcome, MergeOutcome::Replaced);
        assert!(merged.is_verified);
        assert_eq!(merged.translated_name, "Azure Cloud Sect");
        assert_eq!(merged.alternative_names, vec!["Qingyun Sect".to_string()]);
    }

    #[tokio::test]
    async fn test_uniqueness_per_project() {
        let registry = CharacterMappingRegistry::new();
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();

        registry.propose_or_merge(p1, &candidate("王磊", "Wang Lei")).await;
        registry.propose_or_merge(p2, &candidate("王磊", "Leo Wang")).await;

        assert_eq!(registry.list(p1).await.len(), 1);
        assert_eq!(
            registry.resolve(p2, "王磊").await.unwrap().translated_name,
            "Leo Wang"
        );
    }
}
