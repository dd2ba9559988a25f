//! SQLite 膳食库（sqlx 异步连接池）
//!
//! 表结构：users / user_menu_history / menu_ingredients / menu_nutrition_levels。
//! L5 的 total_value 以 "oil,salt" 文本存储，读取时统一 CAST 为 TEXT 再解析。

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::pipeline::NutritionRecord;
use crate::storage::{
    add_vectors, meal_slot, saved_message, MealTime, MenuEntry, NutritionTotals, ReportStore,
    StoreError,
};

pub struct SqliteReportStore {
    pool: SqlitePool,
}

impl SqliteReportStore {
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;
        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    /// 进程内临时库；单连接，否则每个连接各自一份内存库
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_menu_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER,
                dish_name TEXT NOT NULL,
                feature_tags TEXT,
                description TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(user_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS menu_ingredients (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                menu_id INTEGER,
                ingredient_name TEXT NOT NULL,
                ingredient_type TEXT,
                FOREIGN KEY (menu_id) REFERENCES user_menu_history(id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS menu_nutrition_levels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                menu_id INTEGER,
                level_name TEXT NOT NULL,
                total_value REAL,
                ingredients TEXT,
                details TEXT,
                FOREIGN KEY (menu_id) REFERENCES user_menu_history(id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_history_user ON user_menu_history(user_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// 以指定时间保存（事务），返回菜单 id
    pub async fn save_at(
        &self,
        username: &str,
        record: &NutritionRecord,
        at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT OR IGNORE INTO users (username) VALUES (?)")
            .bind(username)
            .execute(&mut *tx)
            .await?;
        let user_id: i64 = sqlx::query("SELECT user_id FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(&mut *tx)
            .await?
            .get("user_id");

        let menu_id = sqlx::query(
            "INSERT INTO user_menu_history (user_id, dish_name, feature_tags, description, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(&record.dish_name)
        .bind(serde_json::to_string(&record.feature_tags)?)
        .bind(&record.description)
        .bind(at.to_rfc3339())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let ingredients = record
            .main_ingredients
            .iter()
            .map(|i| (i, "main"))
            .chain(record.seasonings.iter().map(|s| (s, "seasoning")));
        for (name, kind) in ingredients {
            sqlx::query(
                "INSERT INTO menu_ingredients (menu_id, ingredient_name, ingredient_type) VALUES (?, ?, ?)",
            )
            .bind(menu_id)
            .bind(name)
            .bind(kind)
            .execute(&mut *tx)
            .await?;
        }

        let insert_level = "INSERT INTO menu_nutrition_levels (menu_id, level_name, total_value, ingredients, details)
             VALUES (?, ?, ?, ?, ?)";
        for (name, level) in record.nutrition_vector.levels() {
            sqlx::query(insert_level)
                .bind(menu_id)
                .bind(name)
                .bind(level.total_value)
                .bind(serde_json::to_string(&level.ingredients)?)
                .bind(serde_json::to_string(&level.details)?)
                .execute(&mut *tx)
                .await?;
        }
        let l5 = &record.nutrition_vector.l5;
        sqlx::query(insert_level)
            .bind(menu_id)
            .bind("L5")
            .bind(format!("{},{}", l5.oil, l5.salt))
            .bind(serde_json::to_string(&l5.ingredients)?)
            .bind(serde_json::to_string(&l5.details)?)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(menu_id)
    }

    async fn menus_of(&self, username: &str, limit: i64) -> Result<Vec<MenuEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT h.id, h.dish_name, h.created_at
             FROM user_menu_history h
             JOIN users u ON h.user_id = u.user_id
             WHERE u.username = ?
             ORDER BY h.created_at DESC, h.id DESC
             LIMIT ?",
        )
        .bind(username)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let created_at: String = row.get("created_at");
                Ok(MenuEntry {
                    id: row.get("id"),
                    dish_name: row.get("dish_name"),
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .collect()
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Encode(format!("created_at {}: {}", s, e)))
}

/// 把一行 (level_name, total_value) 计入汇总；L5 形如 "oil,salt"
fn apply_level(totals: &mut NutritionTotals, level: &str, value: &str) {
    let num = |s: &str| s.trim().parse::<f64>().unwrap_or(0.0);
    match level {
        "L1" => totals.l1 = num(value),
        "L2" => totals.l2 = num(value),
        "L3" => totals.l3 = num(value),
        "L4" => totals.l4 = num(value),
        "L5" => {
            if let Some((oil, salt)) = value.split_once(',') {
                totals.oil = num(oil);
                totals.salt = num(salt);
            }
        }
        other => tracing::warn!(level = %other, "unknown nutrition level"),
    }
}

#[async_trait]
impl ReportStore for SqliteReportStore {
    async fn save_analysis_report(
        &self,
        username: &str,
        record: &NutritionRecord,
    ) -> Result<String, StoreError> {
        let menu_id = self.save_at(username, record, Utc::now()).await?;
        tracing::info!(username = %username, menu_id, "analysis report saved");
        Ok(saved_message(username, record))
    }

    async fn user_history(
        &self,
        username: &str,
        limit: Option<usize>,
    ) -> Result<Vec<MenuEntry>, StoreError> {
        // SQLite 中 LIMIT -1 表示不限
        let limit = limit.map(|k| k as i64).unwrap_or(-1);
        self.menus_of(username, limit).await
    }

    async fn nutrition_summary(&self, menu_id: i64) -> Result<Option<NutritionTotals>, StoreError> {
        let rows = sqlx::query(
            "SELECT level_name, CAST(total_value AS TEXT) AS total_value
             FROM menu_nutrition_levels WHERE menu_id = ?",
        )
        .bind(menu_id)
        .fetch_all(&self.pool)
        .await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let mut totals = NutritionTotals::default();
        for row in rows {
            let level: String = row.get("level_name");
            let value: Option<String> = row.get("total_value");
            apply_level(&mut totals, &level, value.as_deref().unwrap_or("0"));
        }
        Ok(Some(totals))
    }

    async fn ingredient_counts(&self, menu_id: i64) -> Result<HashMap<String, usize>, StoreError> {
        let rows = sqlx::query(
            "SELECT ingredient_type, COUNT(*) AS count
             FROM menu_ingredients WHERE menu_id = ?
             GROUP BY ingredient_type",
        )
        .bind(menu_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let kind: Option<String> = row.get("ingredient_type");
                let count: i64 = row.get("count");
                (kind.unwrap_or_default(), count as usize)
            })
            .collect())
    }

    async fn meal_vector(
        &self,
        username: &str,
        meal: MealTime,
        date: NaiveDate,
    ) -> Result<[f64; 6], StoreError> {
        let mut acc = [0.0; 6];
        for menu in self.menus_of(username, -1).await? {
            if meal_slot(menu.created_at) != (date, meal) {
                continue;
            }
            if let Some(totals) = self.nutrition_summary(menu.id).await? {
                add_vectors(&mut acc, totals.as_array());
            }
        }
        Ok(acc)
    }

    async fn delete_user_history(&self, username: &str) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        let user_id: Option<i64> = sqlx::query("SELECT user_id FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| row.get("user_id"));
        let Some(user_id) = user_id else {
            return Ok(0);
        };

        let menus_of_user = "SELECT id FROM user_menu_history WHERE user_id = ?";
        sqlx::query(&format!(
            "DELETE FROM menu_ingredients WHERE menu_id IN ({})",
            menus_of_user
        ))
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "DELETE FROM menu_nutrition_levels WHERE menu_id IN ({})",
            menus_of_user
        ))
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        let deleted = sqlx::query("DELETE FROM user_menu_history WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM users WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(deleted as usize)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for table in [
            "menu_nutrition_levels",
            "menu_ingredients",
            "user_menu_history",
            "users",
        ] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM sqlite_sequence WHERE name = ?")
                .bind(table)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::demo_record_json;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn record() -> NutritionRecord {
        serde_json::from_str(&demo_record_json()).unwrap()
    }

    #[tokio::test]
    async fn test_save_and_read_back() {
        let dir = TempDir::new().unwrap();
        let store = SqliteReportStore::new(dir.path().join("diet.db")).await.unwrap();

        let msg = store.save_analysis_report("alice", &record()).await.unwrap();
        assert!(msg.contains("alice") && msg.contains("西红柿炒鸡蛋"));

        let history = store.user_history("alice", Some(5)).await.unwrap();
        assert_eq!(history.len(), 1);
        let menu_id = history[0].id;

        let totals = store.nutrition_summary(menu_id).await.unwrap().unwrap();
        assert_eq!(totals.as_array(), [0.0, 200.0, 100.0, 0.0, 15.0, 3.0]);

        let counts = store.ingredient_counts(menu_id).await.unwrap();
        assert_eq!(counts.get("main"), Some(&2));
        assert_eq!(counts.get("seasoning"), Some(&3));

        assert!(store.nutrition_summary(menu_id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_order_and_limit() {
        let store = SqliteReportStore::in_memory().await.unwrap();
        let mut r = record();
        for (i, hour) in [1u32, 3, 2].into_iter().enumerate() {
            r.dish_name = format!("dish{}", i);
            let at = Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap();
            store.save_at("bob", &r, at).await.unwrap();
        }
        let all = store.user_history("bob", None).await.unwrap();
        let names: Vec<&str> = all.iter().map(|m| m.dish_name.as_str()).collect();
        assert_eq!(names, vec!["dish1", "dish2", "dish0"]);
        assert_eq!(store.user_history("bob", Some(2)).await.unwrap().len(), 2);
        assert!(store.user_history("nobody", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_meal_vector_sums_window() {
        let store = SqliteReportStore::in_memory().await.unwrap();
        let r = record();
        // 08:00 与 09:00（+08）早餐两份；12:00（+08）午餐一份
        store.save_at("carol", &r, Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()).await.unwrap();
        store.save_at("carol", &r, Utc.with_ymd_and_hms(2024, 5, 1, 1, 0, 0).unwrap()).await.unwrap();
        store.save_at("carol", &r, Utc.with_ymd_and_hms(2024, 5, 1, 4, 0, 0).unwrap()).await.unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let breakfast = store.meal_vector("carol", MealTime::Breakfast, day).await.unwrap();
        assert_eq!(breakfast, [0.0, 400.0, 200.0, 0.0, 30.0, 6.0]);
        let lunch = store.meal_vector("carol", MealTime::Lunch, day).await.unwrap();
        assert_eq!(lunch[4], 15.0);
        let dinner = store.meal_vector("carol", MealTime::Dinner, day).await.unwrap();
        assert_eq!(dinner, [0.0; 6]);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let store = SqliteReportStore::in_memory().await.unwrap();
        store.save_analysis_report("dave", &record()).await.unwrap();
        store.save_analysis_report("dave", &record()).await.unwrap();
        store.save_analysis_report("erin", &record()).await.unwrap();

        assert_eq!(store.delete_user_history("dave").await.unwrap(), 2);
        assert_eq!(store.delete_user_history("dave").await.unwrap(), 0);
        assert_eq!(store.user_history("erin", None).await.unwrap().len(), 1);

        store.clear().await.unwrap();
        assert!(store.user_history("erin", None).await.unwrap().is_empty());
    }
}
