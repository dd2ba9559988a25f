//! 存储协作者：用户膳食库
//!
//! 核心流水线只用 `save_analysis_report`；其余查询（历史、营养汇总、按餐次聚合的六维向量）
//! 供 CLI / Web 报表使用。SQLite 与内存两种实现语义一致。

pub mod in_memory;
pub mod sqlite;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::NutritionRecord;

pub use in_memory::InMemoryReportStore;
pub use sqlite::SqliteReportStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Encode(e.to_string())
    }
}

/// 餐次
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealTime {
    Breakfast,
    Lunch,
    Dinner,
}

impl MealTime {
    /// 05:00-10:00 早餐，10:00-15:00 午餐，其余晚餐
    pub fn of(time: NaiveTime) -> Self {
        match time.hour() {
            5..=9 => MealTime::Breakfast,
            10..=14 => MealTime::Lunch,
            _ => MealTime::Dinner,
        }
    }
}

impl FromStr for MealTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "breakfast" => Ok(MealTime::Breakfast),
            "lunch" => Ok(MealTime::Lunch),
            "dinner" => Ok(MealTime::Dinner),
            other => Err(format!("unknown meal time: {}", other)),
        }
    }
}

impl fmt::Display for MealTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MealTime::Breakfast => "breakfast",
            MealTime::Lunch => "lunch",
            MealTime::Dinner => "dinner",
        };
        f.write_str(s)
    }
}

/// 东八区相对 UTC 的小时偏移
const LOCAL_UTC_OFFSET_HOURS: i64 = 8;

fn to_local(t: DateTime<Utc>) -> NaiveDateTime {
    (t + Duration::hours(LOCAL_UTC_OFFSET_HOURS)).naive_utc()
}

/// 记录时间换算到东八区后的 (日期, 餐次)
pub fn meal_slot(created_at: DateTime<Utc>) -> (NaiveDate, MealTime) {
    let local = to_local(created_at);
    (local.date(), MealTime::of(local.time()))
}

/// 东八区的今天
pub fn local_today() -> NaiveDate {
    to_local(Utc::now()).date()
}

/// 历史菜单条目
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MenuEntry {
    pub id: i64,
    pub dish_name: String,
    pub created_at: DateTime<Utc>,
}

/// 单个菜单的营养汇总
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NutritionTotals {
    #[serde(rename = "L1")]
    pub l1: f64,
    #[serde(rename = "L2")]
    pub l2: f64,
    #[serde(rename = "L3")]
    pub l3: f64,
    #[serde(rename = "L4")]
    pub l4: f64,
    pub oil: f64,
    pub salt: f64,
}

impl NutritionTotals {
    pub fn from_array(v: [f64; 6]) -> Self {
        Self {
            l1: v[0],
            l2: v[1],
            l3: v[2],
            l4: v[3],
            oil: v[4],
            salt: v[5],
        }
    }

    /// [L1, L2, L3, L4, oil, salt]
    pub fn as_array(&self) -> [f64; 6] {
        [self.l1, self.l2, self.l3, self.l4, self.oil, self.salt]
    }
}

/// 逐维相加
pub fn add_vectors(acc: &mut [f64; 6], v: [f64; 6]) {
    for (a, b) in acc.iter_mut().zip(v) {
        *a += b;
    }
}

/// 保存确认信息
pub fn saved_message(username: &str, record: &NutritionRecord) -> String {
    format!("已成功记录 {} 的历史菜单：{}", username, record.dish_name)
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// 保存一条分析报告；流水线唯一依赖的写操作
    async fn save_analysis_report(
        &self,
        username: &str,
        record: &NutritionRecord,
    ) -> Result<String, StoreError>;

    /// 最近 `limit` 条历史（None 为全部），按时间倒序
    async fn user_history(
        &self,
        username: &str,
        limit: Option<usize>,
    ) -> Result<Vec<MenuEntry>, StoreError>;

    async fn nutrition_summary(&self, menu_id: i64) -> Result<Option<NutritionTotals>, StoreError>;

    /// 按 ingredient_type（main / seasoning）计数
    async fn ingredient_counts(&self, menu_id: i64) -> Result<HashMap<String, usize>, StoreError>;

    /// 某日某餐次所有菜单的六维向量之和
    async fn meal_vector(
        &self,
        username: &str,
        meal: MealTime,
        date: NaiveDate,
    ) -> Result<[f64; 6], StoreError>;

    /// 删除用户及其全部历史，返回删除的菜单数
    async fn delete_user_history(&self, username: &str) -> Result<usize, StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_meal_windows_in_utc_plus_8() {
        // 01:30Z = 09:30 +08
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 1, 30, 0).unwrap();
        assert_eq!(meal_slot(t), (NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(), MealTime::Breakfast));
        // 02:00Z = 10:00 +08
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 2, 0, 0).unwrap();
        assert_eq!(meal_slot(t).1, MealTime::Lunch);
        // 07:00Z = 15:00 +08
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap();
        assert_eq!(meal_slot(t).1, MealTime::Dinner);
        // 20:00Z = 次日 04:00 +08
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap();
        assert_eq!(meal_slot(t), (NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(), MealTime::Dinner));
    }

    #[test]
    fn test_meal_time_parse() {
        assert_eq!("Lunch".parse::<MealTime>().unwrap(), MealTime::Lunch);
        assert!("brunch".parse::<MealTime>().is_err());
        assert_eq!(MealTime::Dinner.to_string(), "dinner");
    }
}
