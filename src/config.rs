//! Process configuration and business rules.
//!
//! `AppConfig` comes from the environment and decides where the database
//! and logs live. `BusinessRules` are the per-location money constants; they
//! are stored in `local_settings` (category "business") so an admin can change
//! them without a rebuild.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::db;
use crate::models::{
    DAILY_CONSUMPTION_CREDIT, DAILY_SALARY, DEFAULT_DELIVERY_RATE, DEFAULT_FIXED_BONUS,
};
use crate::money::amount_if_numeric;

pub const APP_IDENTIFIER: &str = "com.caixa.pos";
pub const DEFAULT_LOG_FILTER: &str = "info,caixa_pos_lib=debug";

const BUSINESS_CATEGORY: &str = "business";

// ---------------------------------------------------------------------------
// Process configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_filter: String,
}

impl AppConfig {
    /// Read `CAIXA_POS_DATA_DIR` and `CAIXA_POS_LOG` (then `RUST_LOG`).
    pub fn from_env() -> Self {
        let data_dir = std::env::var("CAIXA_POS_DATA_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let log_filter = std::env::var("CAIXA_POS_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Self::with_data_dir(data_dir, log_filter)
    }

    pub fn with_data_dir(data_dir: PathBuf, log_filter: String) -> Self {
        Self {
            log_dir: data_dir.join("logs"),
            data_dir,
            log_filter,
        }
    }
}

fn default_data_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                .join(".local")
                .join("share")
        });
    base.join(APP_IDENTIFIER)
}

// ---------------------------------------------------------------------------
// Business rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessRules {
    /// Credit each present employee earns per finalized day.
    pub daily_consumption_credit: f64,
    /// Informational base salary stamped on new employees.
    pub daily_salary: f64,
    pub default_delivery_rate: f64,
    pub default_fixed_bonus: f64,
}

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            daily_consumption_credit: DAILY_CONSUMPTION_CREDIT,
            daily_salary: DAILY_SALARY,
            default_delivery_rate: DEFAULT_DELIVERY_RATE,
            default_fixed_bonus: DEFAULT_FIXED_BONUS,
        }
    }
}

const KEY_CREDIT: &str = "daily_consumption_credit";
const KEY_SALARY: &str = "daily_salary";
const KEY_RATE: &str = "default_delivery_rate";
const KEY_BONUS: &str = "default_fixed_bonus";

impl BusinessRules {
    /// Stored rules; missing or unreadable values use the defaults.
    pub fn load(conn: &Connection) -> Self {
        let defaults = Self::default();
        let read = |key: &str, fallback: f64| -> f64 {
            match db::get_setting(conn, BUSINESS_CATEGORY, key) {
                Some(raw) => match raw.trim().parse::<f64>() {
                    Ok(v) if v.is_finite() => v,
                    _ => {
                        warn!(key, value = %raw, "Ignoring unreadable business setting");
                        fallback
                    }
                },
                None => fallback,
            }
        };
        Self {
            daily_consumption_credit: read(KEY_CREDIT, defaults.daily_consumption_credit),
            daily_salary: read(KEY_SALARY, defaults.daily_salary),
            default_delivery_rate: read(KEY_RATE, defaults.default_delivery_rate),
            default_fixed_bonus: read(KEY_BONUS, defaults.default_fixed_bonus),
        }
    }

    pub fn save(&self, conn: &Connection) -> Result<(), String> {
        for (key, value) in [
            (KEY_CREDIT, self.daily_consumption_credit),
            (KEY_SALARY, self.daily_salary),
            (KEY_RATE, self.default_delivery_rate),
            (KEY_BONUS, self.default_fixed_bonus),
        ] {
            db::set_setting(conn, BUSINESS_CATEGORY, key, &value.to_string())?;
        }
        info!(
            credit = self.daily_consumption_credit,
            salary = self.daily_salary,
            rate = self.default_delivery_rate,
            bonus = self.default_fixed_bonus,
            "Business rules saved"
        );
        Ok(())
    }

    /// Apply the camelCase fields present in `patch`. Every given value
    /// must be a non-negative number; nothing changes on error.
    pub fn apply_patch(&self, patch: &Value) -> Result<Self, String> {
        let obj = patch
            .as_object()
            .ok_or("Business rules update must be an object")?;
        let mut next = *self;
        for (key, raw) in obj {
            let slot = match key.as_str() {
                "dailyConsumptionCredit" => &mut next.daily_consumption_credit,
                "dailySalary" => &mut next.daily_salary,
                "defaultDeliveryRate" => &mut next.default_delivery_rate,
                "defaultFixedBonus" => &mut next.default_fixed_bonus,
                other => return Err(format!("Unknown business setting: {other}")),
            };
            match amount_if_numeric(raw) {
                Some(v) if v >= 0.0 => *slot = v,
                _ => return Err(format!("{key} must be a non-negative number")),
            }
        }
        Ok(next)
    }
}
