//! Role-based access control.
//!
//! Every account carries exactly one [`Role`]. Capabilities are a static
//! lookup on the role, and the records a user may see are narrowed by a
//! per-model SQL predicate from [`record_scope`]. Predicates always use `$1`
//! for the viewer's user id, so callers bind the viewer first and number
//! their own parameters from `$2`.

use crate::db::DbPool;
use crate::error::{HarvestError, HarvestResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    FarmManager,
    FieldSupervisor,
    FieldWorker,
    InventoryManager,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Admin,
        Role::FarmManager,
        Role::FieldSupervisor,
        Role::FieldWorker,
        Role::InventoryManager,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::FarmManager => "farm_manager",
            Role::FieldSupervisor => "field_supervisor",
            Role::FieldWorker => "field_worker",
            Role::InventoryManager => "inventory_manager",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::FarmManager => "Farm Manager",
            Role::FieldSupervisor => "Field Supervisor",
            Role::FieldWorker => "Field Worker",
            Role::InventoryManager => "Inventory Manager",
        }
    }

    pub fn has(&self, cap: Capability) -> bool {
        use Capability::*;
        use Role::*;
        match self {
            Admin => true,
            FarmManager => matches!(
                cap,
                ManageFarms
                    | TrackHarvests
                    | ManageInventory
                    | SuperviseFields
                    | ViewAnalytics
                    | GenerateReports
                    | ViewNotifications
                    | ViewUsers
            ),
            FieldSupervisor => matches!(
                cap,
                TrackHarvests | SuperviseFields | ViewAnalytics | ViewNotifications
            ),
            FieldWorker => matches!(cap, TrackHarvests | ViewNotifications),
            InventoryManager => matches!(
                cap,
                ManageInventory | GenerateReports | ViewNotifications
            ),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            can_manage_farms: self.has(Capability::ManageFarms),
            can_track_harvests: self.has(Capability::TrackHarvests),
            can_manage_inventory: self.has(Capability::ManageInventory),
            can_supervise_fields: self.has(Capability::SuperviseFields),
            can_view_analytics: self.has(Capability::ViewAnalytics),
            can_generate_reports: self.has(Capability::GenerateReports),
            can_view_notifications: self.has(Capability::ViewNotifications),
            can_manage_users: self.has(Capability::ManageUsers),
            can_view_users: self.has(Capability::ViewUsers),
        }
    }

    pub fn menu_items(&self) -> Vec<MenuItem> {
        MENU.iter()
            .filter(|(_, _, _, cap)| cap.map_or(true, |c| self.has(c)))
            .map(|&(key, label, path, _)| MenuItem {
                key,
                label,
                path,
            })
            .collect()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s.trim())
            .ok_or_else(|| HarvestError::validation(format!("Unknown role: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ManageFarms,
    TrackHarvests,
    ManageInventory,
    SuperviseFields,
    ViewAnalytics,
    GenerateReports,
    ViewNotifications,
    ManageUsers,
    ViewUsers,
}

impl Capability {
    pub fn describe(&self) -> &'static str {
        match self {
            Capability::ManageFarms => "manage farms",
            Capability::TrackHarvests => "track harvests",
            Capability::ManageInventory => "manage inventory",
            Capability::SuperviseFields => "supervise fields",
            Capability::ViewAnalytics => "view analytics",
            Capability::GenerateReports => "generate reports",
            Capability::ViewNotifications => "view notifications",
            Capability::ManageUsers => "manage users",
            Capability::ViewUsers => "view users",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct Capabilities {
    pub can_manage_farms: bool,
    pub can_track_harvests: bool,
    pub can_manage_inventory: bool,
    pub can_supervise_fields: bool,
    pub can_view_analytics: bool,
    pub can_generate_reports: bool,
    pub can_view_notifications: bool,
    pub can_manage_users: bool,
    pub can_view_users: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuItem {
    pub key: &'static str,
    pub label: &'static str,
    pub path: &'static str,
}

const MENU: [(&str, &str, &str, Option<Capability>); 8] = [
    ("dashboard", "Dashboard", "/dashboard", None),
    ("farm_management", "Farm Management", "/farm-management", Some(Capability::ManageFarms)),
    ("harvest_tracking", "Harvest Tracking", "/harvest-tracking", Some(Capability::TrackHarvests)),
    ("analytics", "Analytics", "/analytics", Some(Capability::ViewAnalytics)),
    ("inventory", "Inventory", "/inventory", Some(Capability::ManageInventory)),
    ("reports", "Reports", "/reports", Some(Capability::GenerateReports)),
    ("notifications", "Notifications", "/notifications", Some(Capability::ViewNotifications)),
    ("user_management", "User Management", "/user-management", Some(Capability::ViewUsers)),
];

/// Models whose visibility depends on the viewer's role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Farm,
    Field,
    HarvestRecord,
    Inventory,
    InventoryItem,
    User,
}

impl Resource {
    pub fn table(&self) -> &'static str {
        match self {
            Resource::Farm => "farms",
            Resource::Field => "fields",
            Resource::HarvestRecord => "harvest_records",
            Resource::Inventory => "inventory",
            Resource::InventoryItem => "inventory_items",
            Resource::User => "users",
        }
    }

    /// Table alias the scope predicates are written against.
    pub fn alias(&self) -> &'static str {
        match self {
            Resource::Farm => "f",
            Resource::Field => "fl",
            Resource::HarvestRecord => "h",
            Resource::Inventory => "i",
            Resource::InventoryItem => "ii",
            Resource::User => "u",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Resource::Farm => "Farm",
            Resource::Field => "Field",
            Resource::HarvestRecord => "Harvest record",
            Resource::Inventory => "Inventory",
            Resource::InventoryItem => "Inventory item",
            Resource::User => "User",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    All,
    Nothing,
    Predicate(&'static str),
}

impl Scope {
    /// SQL boolean expression; always references `$1` so the bind list stays stable.
    pub fn sql(&self) -> &'static str {
        match self {
            Scope::All => "$1::INT IS NOT NULL",
            Scope::Nothing => "$1::INT IS NULL",
            Scope::Predicate(p) => p,
        }
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, Scope::Nothing)
    }
}

pub fn record_scope(role: Role, resource: Resource) -> Scope {
    use Resource::*;
    use Role::*;
    match (role, resource) {
        (Admin, _) => Scope::All,

        (FarmManager, Farm) => Scope::Predicate("f.manager_id = $1"),
        (FarmManager, Field) => Scope::Predicate(
            "EXISTS (SELECT 1 FROM farms sfa WHERE sfa.id = fl.farm_id AND sfa.manager_id = $1)",
        ),
        (FarmManager, HarvestRecord) => Scope::Predicate(
            "EXISTS (SELECT 1 FROM fields sf JOIN farms sfa ON sfa.id = sf.farm_id \
             WHERE sf.id = h.field_id AND sfa.manager_id = $1)",
        ),
        (FarmManager, Inventory | InventoryItem | User) => Scope::All,

        (FieldSupervisor, Farm) => Scope::Predicate(
            "EXISTS (SELECT 1 FROM fields sf WHERE sf.farm_id = f.id AND sf.supervisor_id = $1)",
        ),
        (FieldSupervisor, Field) => Scope::Predicate("fl.supervisor_id = $1"),
        (FieldSupervisor, HarvestRecord) => Scope::Predicate(
            "EXISTS (SELECT 1 FROM fields sf WHERE sf.id = h.field_id AND sf.supervisor_id = $1)",
        ),

        (FieldWorker, Farm) => Scope::Predicate(
            "($1::INT IS NOT NULL AND EXISTS (SELECT 1 FROM fields sf WHERE sf.farm_id = f.id AND sf.is_active))",
        ),
        (FieldWorker, Field) => Scope::Predicate("($1::INT IS NOT NULL AND fl.is_active)"),
        (FieldWorker, HarvestRecord) => Scope::Predicate("h.harvested_by = $1"),

        (InventoryManager, Inventory | InventoryItem) => Scope::All,

        (_, User) => Scope::Predicate("u.id = $1"),
        _ => Scope::Nothing,
    }
}

/// Checks a single record: NotFound when it does not exist, Forbidden when
/// it exists outside the viewer's scope.
pub async fn ensure_object_access(
    pool: &DbPool,
    user_id: i32,
    role: Role,
    resource: Resource,
    id: i32,
) -> HarvestResult<()> {
    let exists_sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)", resource.table());
    let (exists,): (bool,) = sqlx::query_as(&exists_sql)
        .bind(id)
        .fetch_one(pool)
        .await?;
    if !exists {
        return Err(HarvestError::not_found(resource.label()));
    }

    let scope = record_scope(role, resource);
    if scope == Scope::All {
        return Ok(());
    }

    let scoped_sql = format!(
        "SELECT EXISTS(SELECT 1 FROM {table} {alias} WHERE {alias}.id = $2 AND {scope})",
        table = resource.table(),
        alias = resource.alias(),
        scope = scope.sql(),
    );
    let (allowed,): (bool,) = sqlx::query_as(&scoped_sql)
        .bind(user_id)
        .bind(id)
        .fetch_one(pool)
        .await?;

    if allowed {
        Ok(())
    } else {
        Err(HarvestError::forbidden(
            "You don't have access to this resource.",
        ))
    }
}
