//! Database-backed tests. They need a reachable `DATABASE_URL` and are
//! ignored by default: `cargo test -- --ignored`.

#[cfg(test)]
mod tests {
    use crate::access::Role;
    use crate::commands::farms::{refresh_farms, save_farm_axum, scoped_farms, SaveFarmRequest};
    use crate::commands::fields::upcoming_fields;
    use crate::commands::harvest::{
        save_harvest_record_axum, scoped_harvests, HarvestFilter, SaveHarvestRecordRequest,
        StoreHarvestRequest,
    };
    use crate::commands::inventory::items::expire_items;
    use crate::commands::inventory::legacy::{insert_inventory_row, NewInventoryRow};
    use crate::config::AppConfig;
    use crate::db::{self, DbPool, Farm};
    use crate::error::HarvestError;
    use crate::middleware::auth::CurrentUser;
    use crate::state::AppState;
    use axum::extract::{Json, State};
    use chrono::{Duration, NaiveDate, Utc};
    use rust_decimal::Decimal;

    async fn setup_test_db() -> DbPool {
        dotenvy::dotenv().ok();
        let config = AppConfig::from_env().expect("Invalid configuration");
        let pool = db::init_pool(&config.database_url)
            .await
            .expect("Failed to create pool");
        db::init_database(&pool, &config)
            .await
            .expect("Failed to migrate");
        pool
    }

    async fn setup_test_state() -> AppState {
        let pool = setup_test_db().await;
        let config = AppConfig::from_env().expect("Invalid configuration");
        AppState::new(pool, config)
    }

    fn unique(prefix: &str) -> String {
        format!("{}_{}", prefix, Utc::now().timestamp_nanos_opt().unwrap_or_default())
    }

    async fn create_user(pool: &DbPool, role: Role) -> CurrentUser {
        let username = unique(role.as_str());
        let (id,): (i32,) = sqlx::query_as(
            "INSERT INTO users (username, password_hash, role) VALUES ($1, 'x', $2) RETURNING id",
        )
        .bind(&username)
        .bind(role.as_str())
        .fetch_one(pool)
        .await
        .expect("Failed to create user");
        CurrentUser {
            id,
            full_name: username.clone(),
            username,
            role,
        }
    }

    async fn create_farm(pool: &DbPool, manager_id: i32) -> i32 {
        let (id,): (i32,) = sqlx::query_as(
            "INSERT INTO farms (name, manager_id, location, total_area_hectares)
             VALUES ($1, $2, 'Test County', 50) RETURNING id",
        )
        .bind(unique("farm"))
        .bind(manager_id)
        .fetch_one(pool)
        .await
        .expect("Failed to create farm");
        id
    }

    async fn corn_id(pool: &DbPool) -> i32 {
        let (id,): (i32,) = sqlx::query_as("SELECT id FROM crops WHERE name = 'Corn' LIMIT 1")
            .fetch_one(pool)
            .await
            .expect("Seeded crops missing");
        id
    }

    async fn create_field(
        pool: &DbPool,
        farm_id: i32,
        crop_id: i32,
        supervisor_id: i32,
        expected: NaiveDate,
    ) -> i32 {
        let (id,): (i32,) = sqlx::query_as(
            "INSERT INTO fields (farm_id, name, crop_id, area_hectares, planting_date, expected_harvest_date, supervisor_id)
             VALUES ($1, $2, $3, 10, $4, $5, $6) RETURNING id",
        )
        .bind(farm_id)
        .bind(unique("field"))
        .bind(crop_id)
        .bind(expected - Duration::days(120))
        .bind(expected)
        .bind(supervisor_id)
        .fetch_one(pool)
        .await
        .expect("Failed to create field");
        id
    }

    async fn cleanup_users(pool: &DbPool, ids: &[i32]) {
        let _ = sqlx::query("DELETE FROM users WHERE id = ANY($1)")
            .bind(ids)
            .execute(pool)
            .await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_farm_aggregates_follow_harvests() {
        let pool = setup_test_db().await;
        let manager = create_user(&pool, Role::FarmManager).await;
        let worker = create_user(&pool, Role::FieldWorker).await;
        let farm_id = create_farm(&pool, manager.id).await;
        let crop = corn_id(&pool).await;
        let today = Utc::now().date_naive();

        let (field_id,): (i32,) = sqlx::query_as(
            "INSERT INTO fields (farm_id, name, crop_id, area_hectares, planting_date, expected_harvest_date, supervisor_id)
             VALUES ($1, 'North', $2, 10, $3, $4, $5) RETURNING id",
        )
        .bind(farm_id)
        .bind(crop)
        .bind(today - Duration::days(100))
        .bind(today + Duration::days(10))
        .bind(manager.id)
        .fetch_one(&pool)
        .await
        .unwrap();

        for qty in [12, 18] {
            sqlx::query(
                "INSERT INTO harvest_records (field_id, quantity_tons, quality_grade, harvested_by)
                 VALUES ($1, $2, 'A', $3)",
            )
            .bind(field_id)
            .bind(Decimal::from(qty))
            .bind(worker.id)
            .execute(&pool)
            .await
            .unwrap();
        }

        let mut tx = pool.begin().await.unwrap();
        refresh_farms(&mut tx, &[farm_id, farm_id]).await.unwrap();
        tx.commit().await.unwrap();

        let farm: Farm = sqlx::query_as("SELECT * FROM farms WHERE id = $1")
            .bind(farm_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(farm.cached_field_count, 1);
        assert_eq!(farm.cached_total_harvested_tons, Decimal::from(30));
        assert_eq!(farm.cached_average_yield, Decimal::from(3));

        // The worker sees their own harvests, the manager sees the farm's.
        let mine = scoped_harvests(&pool, &worker, &HarvestFilter::default(), 100)
            .await
            .unwrap();
        assert_eq!(mine.len(), 2);
        let managed = scoped_harvests(
            &pool,
            &manager,
            &HarvestFilter {
                farm_id: Some(farm_id),
                ..Default::default()
            },
            100,
        )
        .await
        .unwrap();
        assert_eq!(managed.len(), 2);

        cleanup_users(&pool, &[manager.id, worker.id]).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_managers_only_see_their_farms() {
        let pool = setup_test_db().await;
        let alice = create_user(&pool, Role::FarmManager).await;
        let bob = create_user(&pool, Role::FarmManager).await;
        let alice_farm = create_farm(&pool, alice.id).await;
        let bob_farm = create_farm(&pool, bob.id).await;

        let visible: Vec<i32> = scoped_farms(&pool, &alice, true)
            .await
            .unwrap()
            .iter()
            .map(|f| f.id)
            .collect();
        assert!(visible.contains(&alice_farm));
        assert!(!visible.contains(&bob_farm));

        cleanup_users(&pool, &[alice.id, bob.id]).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_legacy_row_defaults() {
        let pool = setup_test_db().await;
        let keeper = create_user(&pool, Role::InventoryManager).await;
        let crop = corn_id(&pool).await;
        let today = Utc::now().date_naive();

        let mut tx = pool.begin().await.unwrap();
        let id = insert_inventory_row(
            &mut tx,
            &NewInventoryRow {
                crop_id: crop,
                quantity_tons: Decimal::from(40),
                storage_location: unique("Barn"),
                storage_condition: None,
                quality_grade: "b".into(),
                date_stored: today,
                expiry_date: None,
                batch_number: None,
                unit_price: None,
                harvest_record_id: None,
                managed_by: keeper.id,
                notes: None,
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let (condition, grade, expiry): (String, String, chrono::NaiveDate) = sqlx::query_as(
            "SELECT storage_condition, quality_grade, expiry_date FROM inventory WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(condition, "ambient");
        assert_eq!(grade, "B");
        assert_eq!(expiry, today + Duration::days(180));

        cleanup_users(&pool, &[keeper.id]).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_expire_sweep_zeroes_and_logs() {
        let pool = setup_test_db().await;
        let keeper = create_user(&pool, Role::InventoryManager).await;
        let today = Utc::now().date_naive();

        let (item_id,): (i32,) = sqlx::query_as(
            "INSERT INTO inventory_items (crop_type_id, storage_location_id, quantity, quality_grade, date_stored, expiry_date, added_by)
             SELECT ct.id, sl.id, 12.5, 'A', $1, $2, $3
             FROM crop_types ct, storage_locations sl
             ORDER BY ct.id, sl.id LIMIT 1
             RETURNING id",
        )
        .bind(today - Duration::days(60))
        .bind(today - Duration::days(1))
        .bind(keeper.id)
        .fetch_one(&pool)
        .await
        .unwrap();

        let result = expire_items(&pool, Some(keeper.id), today).await.unwrap();
        assert!(result.expired_items >= 1);

        let (quantity,): (Decimal,) =
            sqlx::query_as("SELECT quantity FROM inventory_items WHERE id = $1")
                .bind(item_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(quantity, Decimal::ZERO);

        let (action, delta): (String, Decimal) = sqlx::query_as(
            "SELECT action_type, quantity FROM inventory_transactions WHERE inventory_item_id = $1",
        )
        .bind(item_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(action, "EXPIRED");
        assert_eq!(delta, "-12.5".parse::<Decimal>().unwrap());

        let _ = sqlx::query("DELETE FROM inventory_items WHERE id = $1")
            .bind(item_id)
            .execute(&pool)
            .await;
        cleanup_users(&pool, &[keeper.id]).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_admin_edit_keeps_farm_manager() {
        let state = setup_test_state().await;
        let manager = create_user(&state.pool, Role::FarmManager).await;
        let admin = create_user(&state.pool, Role::Admin).await;
        let farm_id = create_farm(&state.pool, manager.id).await;

        let Json(farm) = save_farm_axum(
            State(state.clone()),
            admin.clone(),
            Json(SaveFarmRequest {
                id: Some(farm_id),
                name: unique("Renamed"),
                location: "Test County".into(),
                total_area_hectares: Decimal::from(60),
                description: None,
                manager_id: None,
                is_active: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(farm.manager_id, manager.id);
        assert_eq!(farm.total_area_hectares, Decimal::from(60));

        let visible = scoped_farms(&state.pool, &manager, true).await.unwrap();
        assert!(visible.iter().any(|f| f.id == farm_id));

        cleanup_users(&state.pool, &[manager.id, admin.id]).await;
    }

    fn harvest_request(id: Option<i32>, field_id: i32, tons: i64, store: bool) -> SaveHarvestRecordRequest {
        SaveHarvestRecordRequest {
            id,
            field_id,
            harvest_date: None,
            quantity_tons: Decimal::from(tons),
            quality_grade: "A".into(),
            status: None,
            weather_conditions: None,
            moisture_content: None,
            notes: String::new(),
            store_in_inventory: store.then(|| StoreHarvestRequest {
                storage_location: "Barn 7".into(),
                storage_condition: None,
                expiry_date: None,
                unit_price: None,
                batch_number: None,
            }),
        }
    }

    #[tokio::test]
    #[ignore]
    async fn test_harvest_resave_books_stock_once() {
        let state = setup_test_state().await;
        let manager = create_user(&state.pool, Role::FarmManager).await;
        let farm_id = create_farm(&state.pool, manager.id).await;
        let crop = corn_id(&state.pool).await;
        let field_id = create_field(&state.pool, farm_id, crop, manager.id, Utc::now().date_naive()).await;

        let Json(view) = save_harvest_record_axum(
            State(state.clone()),
            manager.clone(),
            Json(harvest_request(None, field_id, 10, true)),
        )
        .await
        .unwrap();
        let id = view.record.id;

        let again = save_harvest_record_axum(
            State(state.clone()),
            manager.clone(),
            Json(harvest_request(Some(id), field_id, 12, true)),
        )
        .await;
        assert!(matches!(again, Err(HarvestError::Validation(_))));

        save_harvest_record_axum(
            State(state.clone()),
            manager.clone(),
            Json(harvest_request(Some(id), field_id, 12, false)),
        )
        .await
        .unwrap();

        let (rows, booked): (i64, Decimal) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(quantity_tons), 0) FROM inventory WHERE harvest_record_id = $1",
        )
        .bind(id)
        .fetch_one(&state.pool)
        .await
        .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(booked, Decimal::from(10));

        cleanup_users(&state.pool, &[manager.id]).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_legacy_expiry_before_storage_rejected() {
        let pool = setup_test_db().await;
        let keeper = create_user(&pool, Role::InventoryManager).await;
        let crop = corn_id(&pool).await;
        let today = Utc::now().date_naive();

        let mut tx = pool.begin().await.unwrap();
        let result = insert_inventory_row(
            &mut tx,
            &NewInventoryRow {
                crop_id: crop,
                quantity_tons: Decimal::from(5),
                storage_location: unique("Barn"),
                storage_condition: None,
                quality_grade: "A".into(),
                date_stored: today,
                expiry_date: Some(today - Duration::days(1)),
                batch_number: None,
                unit_price: None,
                harvest_record_id: None,
                managed_by: keeper.id,
                notes: None,
            },
        )
        .await;
        assert!(matches!(result, Err(HarvestError::Validation(_))));
        drop(tx);

        cleanup_users(&pool, &[keeper.id]).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_upcoming_fields_unbounded_without_limit() {
        let pool = setup_test_db().await;
        let manager = create_user(&pool, Role::FarmManager).await;
        let farm_id = create_farm(&pool, manager.id).await;
        let crop = corn_id(&pool).await;
        let today = Utc::now().date_naive();
        for days in 1..=3 {
            create_field(&pool, farm_id, crop, manager.id, today + Duration::days(days)).await;
        }

        let all = upcoming_fields(&pool, &manager, today, 7, None).await.unwrap();
        assert_eq!(all.len(), 3);
        let capped = upcoming_fields(&pool, &manager, today, 7, Some(2)).await.unwrap();
        assert_eq!(capped.len(), 2);

        cleanup_users(&pool, &[manager.id]).await;
    }
}
