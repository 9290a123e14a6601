use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{FromRow, Pool, Postgres};
use std::str::FromStr;

use crate::access::Role;
use crate::config::AppConfig;
use crate::error::{HarvestError, HarvestResult};

pub type DbPool = Pool<Postgres>;

pub async fn init_pool_with_options(opts: PgConnectOptions) -> HarvestResult<DbPool> {
    // connect_lazy_with returns immediately; the first query opens a connection.
    Ok(PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .idle_timeout(std::time::Duration::from_secs(120))
        .max_lifetime(std::time::Duration::from_secs(300))
        .connect_lazy_with(opts))
}

pub async fn init_pool(database_url: &str) -> HarvestResult<DbPool> {
    let opts = PgConnectOptions::from_str(database_url)
        .map_err(|e| HarvestError::Config(format!("Invalid DB URL: {}", e)))?
        .ssl_mode(PgSslMode::Prefer);

    init_pool_with_options(opts).await
}

pub async fn init_database(pool: &DbPool, config: &AppConfig) -> HarvestResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Migrations applied");

    if let Err(e) = ensure_seeds(pool, config).await {
        tracing::warn!("Seeding reference data failed: {}", e);
    }
    Ok(())
}

struct CropTypeSeed {
    name: &'static str,
    display_name: &'static str,
    description: &'static str,
    shelf_life_days: i32,
    /// Tenths of a ton.
    threshold_tenths: i64,
}

const CROP_TYPE_SEEDS: [CropTypeSeed; 8] = [
    CropTypeSeed { name: "corn", display_name: "Corn", description: "Maize crop commonly grown for food and animal feed", shelf_life_days: 365, threshold_tenths: 500 },
    CropTypeSeed { name: "wheat", display_name: "Wheat", description: "Cereal grain used for making flour and bread", shelf_life_days: 730, threshold_tenths: 750 },
    CropTypeSeed { name: "cocoa", display_name: "Cocoa", description: "Cocoa beans used for chocolate production", shelf_life_days: 1095, threshold_tenths: 250 },
    CropTypeSeed { name: "rice", display_name: "Rice", description: "Staple grain crop consumed worldwide", shelf_life_days: 1460, threshold_tenths: 1000 },
    CropTypeSeed { name: "cassava", display_name: "Cassava", description: "Root vegetable and important food source", shelf_life_days: 90, threshold_tenths: 300 },
    CropTypeSeed { name: "yam", display_name: "Yam", description: "Starchy root vegetable", shelf_life_days: 120, threshold_tenths: 200 },
    CropTypeSeed { name: "plantain", display_name: "Plantain", description: "Cooking banana harvested green for staple dishes", shelf_life_days: 30, threshold_tenths: 150 },
    CropTypeSeed { name: "beans", display_name: "Beans", description: "Dried legume seeds rich in protein", shelf_life_days: 365, threshold_tenths: 300 },
];

// (name, code, address, capacity tons)
const STORAGE_LOCATION_SEEDS: [(&str, &str, &str, i64); 5] = [
    ("Main Warehouse", "MW-01", "Central Farm Location, Main Storage Facility", 1000),
    ("Secondary Warehouse", "SW-01", "Secondary Farm Location, Backup Storage", 750),
    ("Cold Storage Unit", "CS-01", "Refrigerated Storage for Perishables", 500),
    ("Dry Storage Facility", "DS-01", "Dry Storage for Grains and Processed Goods", 800),
    ("Processing Center Storage", "PC-01", "Storage attached to processing facility", 400),
];

// (name, variety, crop type, expected t/ha in tenths, growing season days)
const CROP_SEEDS: [(&str, &str, &str, i64, i32); 6] = [
    ("Corn", "Sweet Corn", "cereal", 85, 120),
    ("Wheat", "Winter Wheat", "cereal", 62, 200),
    ("Soybeans", "GMO Roundup Ready", "legume", 38, 130),
    ("Rice", "Jasmine", "cereal", 75, 150),
    ("Cassava", "TMS 30572", "root", 250, 360),
    ("Yam", "White Yam", "root", 150, 280),
];

pub struct DemoAccount {
    pub alias: &'static str,
    pub username: &'static str,
    pub email: &'static str,
    pub password: &'static str,
    pub first_name: &'static str,
    pub role: Role,
}

pub const DEMO_ACCOUNTS: [DemoAccount; 5] = [
    DemoAccount { alias: "admin", username: "admin_demo", email: "demo@harvestpro.com", password: "demo123", first_name: "Admin", role: Role::Admin },
    DemoAccount { alias: "manager", username: "manager_demo", email: "manager@harvestpro.com", password: "manager123", first_name: "Manager", role: Role::FarmManager },
    DemoAccount { alias: "supervisor", username: "supervisor_demo", email: "supervisor@harvestpro.com", password: "supervisor123", first_name: "Supervisor", role: Role::FieldSupervisor },
    DemoAccount { alias: "worker", username: "worker_demo", email: "worker@harvestpro.com", password: "worker123", first_name: "Worker", role: Role::FieldWorker },
    DemoAccount { alias: "inventory", username: "inventory_demo", email: "inventory@harvestpro.com", password: "inventory123", first_name: "Inventory", role: Role::InventoryManager },
];

pub fn demo_account(alias: &str) -> Option<&'static DemoAccount> {
    let alias = alias.trim().to_lowercase();
    DEMO_ACCOUNTS.iter().find(|a| a.alias == alias)
}

async fn ensure_seeds(pool: &DbPool, config: &AppConfig) -> HarvestResult<()> {
    let (admin_exists,): (bool,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)")
            .bind(&config.admin_username)
            .fetch_one(pool)
            .await?;
    if !admin_exists {
        let hash = bcrypt::hash(&config.admin_password, bcrypt::DEFAULT_COST)?;
        sqlx::query(
            "INSERT INTO users (username, password_hash, role, first_name) VALUES ($1, $2, 'admin', 'Administrator') ON CONFLICT DO NOTHING",
        )
        .bind(&config.admin_username)
        .bind(hash)
        .execute(pool)
        .await?;
        tracing::info!("Created admin account '{}'", config.admin_username);
    }

    for seed in CROP_TYPE_SEEDS.iter() {
        sqlx::query(
            "INSERT INTO crop_types (name, display_name, description, average_shelf_life_days, minimum_stock_threshold)
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (name) DO NOTHING",
        )
        .bind(seed.name)
        .bind(seed.display_name)
        .bind(seed.description)
        .bind(seed.shelf_life_days)
        .bind(Decimal::new(seed.threshold_tenths, 1))
        .execute(pool)
        .await?;
    }

    for (name, code, address, capacity) in STORAGE_LOCATION_SEEDS {
        sqlx::query(
            "INSERT INTO storage_locations (name, code, address, capacity_tons)
             VALUES ($1, $2, $3, $4) ON CONFLICT (code) DO NOTHING",
        )
        .bind(name)
        .bind(code)
        .bind(address)
        .bind(Decimal::from(capacity))
        .execute(pool)
        .await?;
    }

    for (name, variety, crop_type, yield_tenths, season) in CROP_SEEDS {
        sqlx::query(
            "INSERT INTO crops (name, variety, crop_type, expected_yield_per_hectare, growing_season_days)
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (name, variety) DO NOTHING",
        )
        .bind(name)
        .bind(variety)
        .bind(crop_type)
        .bind(Decimal::new(yield_tenths, 1))
        .bind(season)
        .execute(pool)
        .await?;
    }

    if config.seed_demo_accounts {
        let created = ensure_demo_accounts(pool).await?;
        if created > 0 {
            tracing::info!("Created {} demo accounts", created);
        }
    }
    Ok(())
}

pub async fn ensure_demo_accounts(pool: &DbPool) -> HarvestResult<u64> {
    let mut created = 0;
    for account in DEMO_ACCOUNTS.iter() {
        let hash = bcrypt::hash(account.password, bcrypt::DEFAULT_COST)?;
        let res = sqlx::query(
            "INSERT INTO users (username, email, first_name, last_name, password_hash, role)
             VALUES ($1, $2, $3, 'Demo', $4, $5) ON CONFLICT (username) DO NOTHING",
        )
        .bind(account.username)
        .bind(account.email)
        .bind(account.first_name)
        .bind(hash)
        .bind(account.role.as_str())
        .execute(pool)
        .await?;
        created += res.rows_affected();
    }
    Ok(created)
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn role(&self) -> HarvestResult<Role> {
        self.role.parse()
    }

    pub fn full_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            self.username.clone()
        } else {
            name.to_string()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Farm {
    pub id: i32,
    pub name: String,
    pub manager_id: i32,
    pub location: String,
    pub total_area_hectares: Decimal,
    pub description: Option<String>,
    pub is_active: bool,
    pub cached_field_area_hectares: Decimal,
    pub cached_field_count: i32,
    pub cached_total_harvested_tons: Decimal,
    pub cached_average_yield: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(default)]
    pub manager_username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Crop {
    pub id: i32,
    pub name: String,
    pub variety: String,
    pub crop_type: String,
    pub expected_yield_per_hectare: Option<Decimal>,
    pub growing_season_days: Option<i32>,
    pub description: Option<String>,
    pub is_active: bool,
}

impl Crop {
    pub fn label(&self) -> String {
        if self.variety.is_empty() {
            self.name.clone()
        } else {
            format!("{} - {}", self.name, self.variety)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CropType {
    pub id: i32,
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub average_shelf_life_days: i32,
    pub minimum_stock_threshold: Decimal,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StorageLocation {
    pub id: i32,
    pub name: String,
    pub code: String,
    pub address: Option<String>,
    pub capacity_tons: Decimal,
    pub is_active: bool,
    #[sqlx(default)]
    pub stored_tons: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Field {
    pub id: i32,
    pub farm_id: i32,
    pub name: String,
    pub crop_id: i32,
    pub area_hectares: Decimal,
    pub planting_date: NaiveDate,
    pub expected_harvest_date: NaiveDate,
    pub supervisor_id: i32,
    pub soil_type: Option<String>,
    pub irrigation_type: Option<String>,
    pub is_active: bool,
    pub notes: Option<String>,
    #[sqlx(default)]
    pub farm_name: Option<String>,
    #[sqlx(default)]
    pub crop_name: Option<String>,
    #[sqlx(default)]
    pub expected_yield_per_hectare: Option<Decimal>,
    #[sqlx(default)]
    pub supervisor_username: Option<String>,
    #[sqlx(default)]
    pub total_harvested: Option<Decimal>,
    #[sqlx(default)]
    pub harvest_count: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HarvestRecord {
    pub id: i32,
    pub field_id: i32,
    pub harvest_date: NaiveDate,
    pub quantity_tons: Decimal,
    pub quality_grade: String,
    pub harvested_by: i32,
    pub status: String,
    pub weather_conditions: Option<String>,
    pub moisture_content: Option<Decimal>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    #[sqlx(default)]
    pub field_name: Option<String>,
    #[sqlx(default)]
    pub farm_id: Option<i32>,
    #[sqlx(default)]
    pub farm_name: Option<String>,
    #[sqlx(default)]
    pub crop_name: Option<String>,
    #[sqlx(default)]
    pub area_hectares: Option<Decimal>,
    #[sqlx(default)]
    pub expected_yield_per_hectare: Option<Decimal>,
    #[sqlx(default)]
    pub harvested_by_username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InventoryRow {
    pub id: i32,
    pub crop_id: i32,
    pub quantity_tons: Decimal,
    pub storage_location: String,
    pub storage_condition: String,
    pub quality_grade: String,
    pub date_stored: NaiveDate,
    pub expiry_date: NaiveDate,
    pub batch_number: Option<String>,
    pub unit_price: Option<Decimal>,
    pub is_reserved: bool,
    pub harvest_record_id: Option<i32>,
    pub managed_by: i32,
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(default)]
    pub crop_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InventoryItem {
    pub id: i32,
    pub crop_type_id: i32,
    pub storage_location_id: i32,
    pub quantity: Decimal,
    pub quality_grade: String,
    pub date_stored: NaiveDate,
    pub expiry_date: NaiveDate,
    pub added_by: Option<i32>,
    pub created_at: DateTime<Utc>,
    #[sqlx(default)]
    pub crop_type_name: Option<String>,
    #[sqlx(default)]
    pub location_name: Option<String>,
    #[sqlx(default)]
    pub minimum_stock_threshold: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InventoryTransaction {
    pub id: i32,
    pub inventory_item_id: i32,
    pub action_type: String,
    pub quantity: Decimal,
    pub previous_quantity: Decimal,
    pub new_quantity: Decimal,
    pub notes: Option<String>,
    pub user_id: Option<i32>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReportRecord {
    pub id: i32,
    pub report_type: String,
    pub format: String,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub farm_id: Option<i32>,
    pub generated_by: i32,
    pub row_count: i32,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_account_lookup() {
        assert_eq!(demo_account("Manager").unwrap().role, Role::FarmManager);
        assert_eq!(demo_account(" worker ").unwrap().username, "worker_demo");
        assert!(demo_account("owner").is_none());
    }

    #[test]
    fn test_demo_accounts_cover_every_role() {
        for role in Role::ALL {
            assert!(DEMO_ACCOUNTS.iter().any(|a| a.role == role));
        }
    }

    #[test]
    fn test_crop_type_seeds_cover_catalogue() {
        let names: Vec<&str> = CROP_TYPE_SEEDS.iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            ["corn", "wheat", "cocoa", "rice", "cassava", "yam", "plantain", "beans"]
        );
        assert!(CROP_TYPE_SEEDS.iter().all(|s| s.shelf_life_days > 0));
    }

    #[test]
    fn test_crop_label() {
        let mut crop = Crop {
            id: 1,
            name: "Corn".into(),
            variety: "Sweet Corn".into(),
            crop_type: "cereal".into(),
            expected_yield_per_hectare: None,
            growing_season_days: None,
            description: None,
            is_active: true,
        };
        assert_eq!(crop.label(), "Corn - Sweet Corn");
        crop.variety.clear();
        assert_eq!(crop.label(), "Corn");
    }
}
