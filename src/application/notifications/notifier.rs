//! Producer façade
//!
//! Business logic calls one `notify_*` method per entity kind. Each call
//! enqueues a single-record notification and a list notification so that
//! subscribers can react per record or simply refetch the collection.

use std::sync::Arc;

use tracing::{debug, warn};

use super::buffer::NotificationBuffer;
use crate::domain::notification::{
    Action, Entity, ListChangeNotification, NotificationData, SingleChangeNotification,
};

/// Rebuilds cached session hashes when users or tenants change.
///
/// Supplied by the session layer; failures are logged and never block
/// enqueueing.
pub trait SessionHashInvalidator: Send + Sync {
    fn user_changed(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    fn tenant_changed(&self, tenant_id: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Cloneable handle producers use to enqueue change notifications
#[derive(Clone)]
pub struct ChangeNotifier {
    buffer: Arc<NotificationBuffer>,
    session_hashes: Option<Arc<dyn SessionHashInvalidator>>,
}

impl ChangeNotifier {
    pub fn new(buffer: Arc<NotificationBuffer>) -> Self {
        Self {
            buffer,
            session_hashes: None,
        }
    }

    pub fn with_session_hash_invalidator(mut self, hook: Arc<dyn SessionHashInvalidator>) -> Self {
        self.session_hashes = Some(hook);
        self
    }

    fn notify_pair(
        &self,
        tenant_id: &str,
        single: Entity,
        list: Entity,
        action: Action,
        data: NotificationData,
    ) {
        debug!(tenant_id, entity = %single, %action, id = %data.id, "Change notification");
        self.buffer
            .add_single_change(SingleChangeNotification::new(tenant_id, single, action, data));
        self.buffer
            .add_list_change(ListChangeNotification::new(tenant_id, list, action));
    }

    pub fn notify_user(&self, tenant_id: &str, action: Action, data: NotificationData) {
        if let Some(hook) = &self.session_hashes {
            if !data.id.is_empty() {
                if let Err(e) = hook.user_changed(tenant_id, &data.id) {
                    warn!(tenant_id, user_id = %data.id, error = %e, "Failed to rebuild user session hash");
                }
            }
        }
        self.notify_pair(tenant_id, Entity::User, Entity::Users, action, data);
    }

    pub fn notify_tenant(&self, tenant_id: &str, action: Action, data: NotificationData) {
        if let Some(hook) = &self.session_hashes {
            if !data.id.is_empty() {
                if let Err(e) = hook.tenant_changed(&data.id) {
                    warn!(tenant_id = %data.id, error = %e, "Failed to rebuild tenant session hash");
                }
            }
        }
        self.notify_pair(tenant_id, Entity::Tenant, Entity::Tenants, action, data);
    }

    pub fn notify_site(&self, tenant_id: &str, action: Action, data: NotificationData) {
        self.notify_pair(tenant_id, Entity::Site, Entity::Sites, action, data);
    }

    pub fn notify_site_area(&self, tenant_id: &str, action: Action, data: NotificationData) {
        self.notify_pair(tenant_id, Entity::SiteArea, Entity::SiteAreas, action, data);
    }

    pub fn notify_company(&self, tenant_id: &str, action: Action, data: NotificationData) {
        self.notify_pair(tenant_id, Entity::Company, Entity::Companies, action, data);
    }

    pub fn notify_asset(&self, tenant_id: &str, action: Action, data: NotificationData) {
        self.notify_pair(tenant_id, Entity::Asset, Entity::Assets, action, data);
    }

    pub fn notify_transaction(&self, tenant_id: &str, action: Action, data: NotificationData) {
        self.notify_pair(tenant_id, Entity::Transaction, Entity::Transactions, action, data);
    }

    pub fn notify_charging_station(&self, tenant_id: &str, action: Action, data: NotificationData) {
        self.notify_pair(
            tenant_id,
            Entity::ChargingStation,
            Entity::ChargingStations,
            action,
            data,
        );
    }

    pub fn notify_registration_token(&self, tenant_id: &str, action: Action, data: NotificationData) {
        self.notify_pair(
            tenant_id,
            Entity::RegistrationToken,
            Entity::RegistrationTokens,
            action,
            data,
        );
    }

    pub fn notify_invoice(&self, tenant_id: &str, action: Action, data: NotificationData) {
        self.notify_pair(tenant_id, Entity::Invoice, Entity::Invoices, action, data);
    }

    pub fn notify_car(&self, tenant_id: &str, action: Action, data: NotificationData) {
        self.notify_pair(tenant_id, Entity::Car, Entity::Cars, action, data);
    }

    pub fn notify_car_catalog(&self, tenant_id: &str, action: Action, data: NotificationData) {
        self.notify_pair(tenant_id, Entity::CarCatalog, Entity::CarCatalogs, action, data);
    }

    pub fn notify_charging_profile(&self, tenant_id: &str, action: Action, data: NotificationData) {
        self.notify_pair(
            tenant_id,
            Entity::ChargingProfile,
            Entity::ChargingProfiles,
            action,
            data,
        );
    }

    pub fn notify_ocpi_endpoint(&self, tenant_id: &str, action: Action, data: NotificationData) {
        self.notify_pair(tenant_id, Entity::OcpiEndpoint, Entity::OcpiEndpoints, action, data);
    }

    /// Log entries have no record identity: list notification only.
    pub fn notify_logging(&self, tenant_id: &str, action: Action) {
        debug!(tenant_id, %action, "Logging change notification");
        self.buffer
            .add_list_change(ListChangeNotification::new(tenant_id, Entity::Loggings, action));
    }
}
