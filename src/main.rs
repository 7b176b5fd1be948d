//! Yiliu（译流）- AI 小说翻译流水线编排器
//!
//! 入口：演示一次端到端翻译——三章样例小说走完
//! 大纲 → 角色映射 → 翻译 → 质量检查 → 审核，打印进度与收敛的译名表。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use yiliu::config::load_config;
use yiliu::content::InMemoryContentStore;
use yiliu::core::engine::build_providers;
use yiliu::model::ProjectSettings;
use yiliu::PipelineEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    yiliu::observability::init();

    let config = load_config(None).context("Failed to load config")?;

    // 样例小说：三章，主角王磊贯穿全书
    let content = Arc::new(InMemoryContentStore::new());
    let novel_id = content
        .seed_novel(vec![
            (
                "第一章 山村少年".to_string(),
                "王磊出生在青云山脚下的一个小村庄。十六岁那年，一位路过的修士看出他灵根不凡。".to_string(),
            ),
            (
                "第二章 入门考核".to_string(),
                "青云宗的入门考核三年一次。王磊背着行囊走了七天山路，终于见到了山门。".to_string(),
            ),
            (
                "第三章 初遇林雪".to_string(),
                "考核场上，王磊注意到一个白衣少女。有人低声说，那是林家的天才林雪。".to_string(),
            ),
        ])
        .await;

    let providers = build_providers(&config);
    let engine = PipelineEngine::start(config, providers, content);

    let project_id = engine
        .create_project("demo-novel-en", novel_id, ProjectSettings::default())
        .await;
    let mut events = engine.subscribe_events();
    engine
        .start_project(project_id)
        .await
        .context("Failed to start project")?;

    // 消费事件直到项目到达终态
    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(e) => {
                        if e.task_id.is_none() {
                            tracing::info!("Project {} -> {}", e.old_status, e.new_status);
                        }
                    }
                    Err(_) => break,
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {}
        }

        let progress = engine.project_progress(project_id).await?;
        if progress.status.is_terminal() {
            break;
        }
    }

    let progress = engine.project_progress(project_id).await?;
    tracing::info!(
        "Final: status={} progress={:.0}% chapters={}/{} tokens={} cost={:.4}",
        progress.status.as_str(),
        progress.overall_progress,
        progress.completed_chapters,
        progress.total_chapters,
        progress.tokens_used,
        progress.actual_cost,
    );
    for mapping in engine.list_character_mappings(project_id).await {
        tracing::info!(
            "Mapping: {} => {} (seen {} times)",
            mapping.original_name,
            mapping.translated_name,
            mapping.appearance_frequency,
        );
    }

    engine.shutdown();
    Ok(())
}
