//! Change notification model
//!
//! Two shapes travel to subscribers: list-level notifications ("refetch
//! this collection") and single-record notifications carrying the changed
//! record's identity.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of change applied to an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity name carried by a notification.
///
/// The name doubles as the event name subscribers listen on. Singular
/// names address one record, plural names address a collection view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Entity {
    User,
    Users,
    Tenant,
    Tenants,
    Site,
    Sites,
    SiteArea,
    SiteAreas,
    Company,
    Companies,
    Asset,
    Assets,
    Transaction,
    Transactions,
    ChargingStation,
    ChargingStations,
    RegistrationToken,
    RegistrationTokens,
    Invoice,
    Invoices,
    Car,
    Cars,
    CarCatalog,
    CarCatalogs,
    ChargingProfile,
    ChargingProfiles,
    OcpiEndpoint,
    OcpiEndpoints,
    Loggings,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Users => "Users",
            Self::Tenant => "Tenant",
            Self::Tenants => "Tenants",
            Self::Site => "Site",
            Self::Sites => "Sites",
            Self::SiteArea => "SiteArea",
            Self::SiteAreas => "SiteAreas",
            Self::Company => "Company",
            Self::Companies => "Companies",
            Self::Asset => "Asset",
            Self::Assets => "Assets",
            Self::Transaction => "Transaction",
            Self::Transactions => "Transactions",
            Self::ChargingStation => "ChargingStation",
            Self::ChargingStations => "ChargingStations",
            Self::RegistrationToken => "RegistrationToken",
            Self::RegistrationTokens => "RegistrationTokens",
            Self::Invoice => "Invoice",
            Self::Invoices => "Invoices",
            Self::Car => "Car",
            Self::Cars => "Cars",
            Self::CarCatalog => "CarCatalog",
            Self::CarCatalogs => "CarCatalogs",
            Self::ChargingProfile => "ChargingProfile",
            Self::ChargingProfiles => "ChargingProfiles",
            Self::OcpiEndpoint => "OcpiEndpoint",
            Self::OcpiEndpoints => "OcpiEndpoints",
            Self::Loggings => "Loggings",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity (and optional snapshot) of the record a single notification
/// refers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Remaining fields of the record snapshot, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NotificationData {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: None,
            extra: Map::new(),
        }
    }

    pub fn with_type(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Coarse-grained "refetch the collection" signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListChangeNotification {
    #[serde(rename = "tenantID")]
    pub tenant_id: String,
    pub entity: Entity,
    pub action: Action,
}

impl ListChangeNotification {
    pub fn new(tenant_id: impl Into<String>, entity: Entity, action: Action) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            entity,
            action,
        }
    }

    /// Two list notifications with equal keys are merged in the buffer.
    pub fn dedup_key(&self) -> (&str, Entity, Action) {
        (&self.tenant_id, self.entity, self.action)
    }
}

/// Fine-grained notification about one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleChangeNotification {
    #[serde(rename = "tenantID")]
    pub tenant_id: String,
    pub entity: Entity,
    pub action: Action,
    pub data: NotificationData,
}

impl SingleChangeNotification {
    pub fn new(
        tenant_id: impl Into<String>,
        entity: Entity,
        action: Action,
        data: NotificationData,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            entity,
            action,
            data,
        }
    }

    /// Dedup key: tenant, entity, action plus the record's id and type.
    pub fn dedup_key(&self) -> (&str, Entity, Action, &str, Option<&str>) {
        (
            &self.tenant_id,
            self.entity,
            self.action,
            &self.data.id,
            self.data.kind.as_deref(),
        )
    }
}

/// Which of the two queues a notification belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    List,
    Single,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Single => "single",
        }
    }
}
