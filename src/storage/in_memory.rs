//! 内存膳食库：与 SQLite 实现语义一致，用于测试与无数据库的演示
//!
//! 可配置为保存必然失败，并统计保存调用次数。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;

use crate::pipeline::NutritionRecord;
use crate::storage::{
    add_vectors, meal_slot, saved_message, MealTime, MenuEntry, NutritionTotals, ReportStore,
    StoreError,
};

#[derive(Debug, Clone)]
struct StoredMenu {
    id: i64,
    username: String,
    created_at: DateTime<Utc>,
    record: NutritionRecord,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    menus: Vec<StoredMenu>,
}

#[derive(Debug, Default)]
pub struct InMemoryReportStore {
    inner: RwLock<Inner>,
    fail_saves: bool,
    save_calls: AtomicUsize,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次保存都返回 StoreError::Unavailable
    pub fn failing() -> Self {
        Self {
            fail_saves: true,
            ..Self::default()
        }
    }

    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    pub async fn save_at(
        &self,
        username: &str,
        record: &NutritionRecord,
        at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves {
            return Err(StoreError::Unavailable("store configured to fail".to_string()));
        }
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.menus.push(StoredMenu {
            id,
            username: username.to_string(),
            created_at: at,
            record: record.clone(),
        });
        Ok(id)
    }

    /// 已保存的记录（按保存顺序）
    pub async fn records(&self) -> Vec<(String, NutritionRecord)> {
        self.inner
            .read()
            .await
            .menus
            .iter()
            .map(|m| (m.username.clone(), m.record.clone()))
            .collect()
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn save_analysis_report(
        &self,
        username: &str,
        record: &NutritionRecord,
    ) -> Result<String, StoreError> {
        self.save_at(username, record, Utc::now()).await?;
        Ok(saved_message(username, record))
    }

    async fn user_history(
        &self,
        username: &str,
        limit: Option<usize>,
    ) -> Result<Vec<MenuEntry>, StoreError> {
        let inner = self.inner.read().await;
        let mut menus: Vec<MenuEntry> = inner
            .menus
            .iter()
            .filter(|m| m.username == username)
            .map(|m| MenuEntry {
                id: m.id,
                dish_name: m.record.dish_name.clone(),
                created_at: m.created_at,
            })
            .collect();
        menus.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        if let Some(k) = limit {
            menus.truncate(k);
        }
        Ok(menus)
    }

    async fn nutrition_summary(&self, menu_id: i64) -> Result<Option<NutritionTotals>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .menus
            .iter()
            .find(|m| m.id == menu_id)
            .map(|m| NutritionTotals::from_array(m.record.nutrition_vector.as_array())))
    }

    async fn ingredient_counts(&self, menu_id: i64) -> Result<HashMap<String, usize>, StoreError> {
        let inner = self.inner.read().await;
        let mut counts = HashMap::new();
        if let Some(m) = inner.menus.iter().find(|m| m.id == menu_id) {
            if !m.record.main_ingredients.is_empty() {
                counts.insert("main".to_string(), m.record.main_ingredients.len());
            }
            if !m.record.seasonings.is_empty() {
                counts.insert("seasoning".to_string(), m.record.seasonings.len());
            }
        }
        Ok(counts)
    }

    async fn meal_vector(
        &self,
        username: &str,
        meal: MealTime,
        date: NaiveDate,
    ) -> Result<[f64; 6], StoreError> {
        let inner = self.inner.read().await;
        let mut acc = [0.0; 6];
        for m in inner
            .menus
            .iter()
            .filter(|m| m.username == username && meal_slot(m.created_at) == (date, meal))
        {
            add_vectors(&mut acc, m.record.nutrition_vector.as_array());
        }
        Ok(acc)
    }

    async fn delete_user_history(&self, username: &str) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.menus.len();
        inner.menus.retain(|m| m.username != username);
        Ok(before - inner.menus.len())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        *inner = Inner::default();
        Ok(())
    }
}
