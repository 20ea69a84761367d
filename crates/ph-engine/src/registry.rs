//! Service registry
//!
//! Local services published by the user and the per-collaborator groups of
//! invites and incoming services. Every operation validates its arguments,
//! then computes the whole next snapshot inside a single
//! [`StateStore::update_with`] call, so a failed operation changes nothing
//! and no partial mutation is ever observable. Registry notifications are
//! emitted after the commit.

use std::collections::HashSet;
use std::sync::Arc;

use ph_core::config::InletConfig;
use ph_core::{
    EngineError, Invite, Invitee, LocalService, Service, ServiceGroup, ServiceRef, Snapshot,
};

use crate::notify::{NotificationDispatcher, RegistryEvent};
use crate::store::StateStore;

pub struct ServiceRegistry {
    store: Arc<StateStore>,
    notifier: NotificationDispatcher,
    inlets: InletConfig,
}

impl ServiceRegistry {
    pub fn new(store: Arc<StateStore>, notifier: NotificationDispatcher, inlets: InletConfig) -> Self {
        Self {
            store,
            notifier,
            inlets,
        }
    }

    /// Publish a new local service
    pub fn create_local_service(
        &self,
        name: &str,
        address: &str,
        port: u16,
        scheme: Option<String>,
    ) -> Result<LocalService, EngineError> {
        validate_name(name)?;
        validate_endpoint(address, port)?;

        let service = LocalService {
            name: name.to_string(),
            address: address.to_string(),
            port,
            scheme: non_empty(scheme),
            shared_with: Vec::new(),
            available: false,
        };

        self.store.update_with::<EngineError>(|current| {
            if current.local_service(name).is_some() {
                return Err(EngineError::DuplicateName(name.to_string()));
            }
            let mut next = current.clone();
            next.local_services.push(service.clone());
            Ok(next)
        })?;

        tracing::info!("Created service '{}' at {}:{}", name, address, port);
        Ok(service)
    }

    /// Replace the endpoint of a local service, keeping its shares
    pub fn modify_local_service(
        &self,
        name: &str,
        address: &str,
        port: u16,
        scheme: Option<String>,
    ) -> Result<LocalService, EngineError> {
        validate_endpoint(address, port)?;
        let scheme = non_empty(scheme);

        let commit = self.store.update_with::<EngineError>(|current| {
            let mut next = current.clone();
            let service = find_local_mut(&mut next, name)?;
            service.address = address.to_string();
            service.port = port;
            service.scheme = scheme;
            service.available = false;
            Ok(next)
        })?;

        tracing::info!("Modified service '{}' -> {}:{}", name, address, port);
        commit
            .current
            .local_service(name)
            .cloned()
            .ok_or_else(|| EngineError::not_found("service", name))
    }

    /// Remove a local service together with every share of it
    pub fn delete_local_service(&self, name: &str) -> Result<(), EngineError> {
        let mut revoked = 0;
        self.store.update_with::<EngineError>(|current| {
            let index = current
                .local_services
                .iter()
                .position(|s| s.name == name)
                .ok_or_else(|| EngineError::not_found("service", name))?;
            let mut next = current.clone();
            revoked = next.local_services.remove(index).shared_with.len();
            Ok(next)
        })?;

        tracing::info!("Deleted service '{}' ({} share(s) revoked)", name, revoked);
        self.notifier.on_registry_event(&RegistryEvent::ServiceDeleted {
            name: name.to_string(),
            revoked,
        });
        Ok(())
    }

    /// Share a local service. Sharing twice with the same email is a no-op.
    pub fn share_service(&self, name: &str, invitee: Invitee) -> Result<(), EngineError> {
        validate_email(&invitee.email)?;

        let mut added = false;
        self.store.update_with::<EngineError>(|current| {
            let service = current
                .local_service(name)
                .ok_or_else(|| EngineError::not_found("service", name))?;
            if service.is_shared_with(&invitee.email) {
                return Ok(current.clone());
            }
            let mut next = current.clone();
            find_local_mut(&mut next, name)?.shared_with.push(invitee.clone());
            added = true;
            Ok(next)
        })?;

        if added {
            tracing::info!("Shared '{}' with {}", name, invitee.email);
            self.notifier.on_registry_event(&RegistryEvent::ServiceShared {
                service: name.to_string(),
                email: invitee.email,
            });
        }
        Ok(())
    }

    /// Record an inbound invite, creating the sender's group if needed
    pub fn record_invite(&self, from_email: &str, invite: Invite) -> Result<(), EngineError> {
        validate_email(from_email)?;
        if invite.id.trim().is_empty() {
            return Err(EngineError::invalid("invite id must not be empty"));
        }
        validate_name(&invite.service_name)?;

        self.store.update_with::<EngineError>(|current| {
            if current
                .group(from_email)
                .is_some_and(|g| g.invite(&invite.id).is_some())
            {
                return Err(EngineError::DuplicateInvite {
                    email: from_email.to_string(),
                    id: invite.id.clone(),
                });
            }
            let mut next = current.clone();
            group_entry(&mut next, from_email).invites.push(invite.clone());
            Ok(next)
        })?;

        tracing::info!("Recorded invite '{}' from {}", invite.id, from_email);
        self.notifier.on_registry_event(&RegistryEvent::InviteRecorded {
            from: from_email.to_string(),
            service_name: invite.service_name,
        });
        Ok(())
    }

    /// Accept a pending invite, materializing an incoming service on a free inlet port
    pub fn accept_invite(&self, from_email: &str, invite_id: &str) -> Result<Service, EngineError> {
        let mut accepted = None;
        self.store.update_with::<EngineError>(|current| {
            let mut next = current.clone();
            let group = find_group_mut(&mut next, from_email)?;
            let invite = take_invite(group, invite_id)?;
            let port = self.allocate_inlet_port(current)?;

            let service = Service {
                source_name: invite.service_name,
                address: self.inlets.bind_address.clone(),
                port,
                scheme: invite.service_scheme,
                available: false,
            };
            group.incoming_services.push(service.clone());
            accepted = Some(service);
            Ok(next)
        })?;

        let service = accepted.ok_or_else(|| EngineError::not_found("invite", invite_id))?;
        tracing::info!(
            "Accepted invite '{}' from {}: {} on {}:{}",
            invite_id,
            from_email,
            service.source_name,
            service.address,
            service.port
        );
        self.notifier.on_registry_event(&RegistryEvent::InviteAccepted {
            from: from_email.to_string(),
            service_name: service.source_name.clone(),
            address: service.address.clone(),
            port: service.port,
        });
        Ok(service)
    }

    /// Drop a pending invite without creating anything
    pub fn reject_invite(&self, from_email: &str, invite_id: &str) -> Result<(), EngineError> {
        self.store.update_with::<EngineError>(|current| {
            let mut next = current.clone();
            take_invite(find_group_mut(&mut next, from_email)?, invite_id)?;
            Ok(next)
        })?;

        tracing::info!("Rejected invite '{}' from {}", invite_id, from_email);
        Ok(())
    }

    /// Set the display profile of an existing collaborator group
    pub fn update_group_profile(
        &self,
        email: &str,
        name: Option<String>,
        image_url: Option<String>,
    ) -> Result<(), EngineError> {
        self.store.update_with::<EngineError>(|current| {
            let mut next = current.clone();
            let group = find_group_mut(&mut next, email)?;
            group.name = non_empty(name);
            group.image_url = non_empty(image_url);
            Ok(next)
        })?;
        Ok(())
    }

    /// Update the availability of one service, leaving every other field as is
    pub fn set_availability(&self, service: &ServiceRef, available: bool) -> Result<(), EngineError> {
        self.apply_availability(service, None, available)?;
        Ok(())
    }

    /// Apply a result measured against `address:port`.
    ///
    /// Returns false without changing anything when the service no longer
    /// listens there, so a result for an endpoint replaced in the meantime
    /// cannot land on the new one.
    pub fn record_availability(
        &self,
        service: &ServiceRef,
        address: &str,
        port: u16,
        available: bool,
    ) -> Result<bool, EngineError> {
        self.apply_availability(service, Some((address, port)), available)
    }

    fn apply_availability(
        &self,
        service: &ServiceRef,
        measured_at: Option<(&str, u16)>,
        available: bool,
    ) -> Result<bool, EngineError> {
        let mut applied = true;
        let commit = self.store.update_with::<EngineError>(|current| {
            let mut next = current.clone();
            match service {
                ServiceRef::Local { name } => {
                    let local = find_local_mut(&mut next, name)?;
                    if let Some((address, port)) = measured_at {
                        if local.address != address || local.port != port {
                            applied = false;
                            return Ok(current.clone());
                        }
                    }
                    local.available = available;
                }
                ServiceRef::Incoming {
                    email,
                    address,
                    port,
                } => {
                    let incoming = find_group_mut(&mut next, email)?
                        .incoming_services
                        .iter_mut()
                        .find(|s| s.address == *address && s.port == *port)
                        .ok_or_else(|| {
                            EngineError::not_found("incoming service", format!("{}:{}", address, port))
                        })?;
                    incoming.available = available;
                }
            }
            Ok(next)
        })?;

        if commit.changed() {
            tracing::debug!(%service, available, "Availability changed");
        } else if !applied {
            tracing::debug!(%service, "Ignoring availability for a replaced endpoint");
        }
        Ok(applied)
    }

    /// Drop every local service and group
    pub fn clear(&self) {
        let commit = self.store.modify(|current| Snapshot {
            local_services: Vec::new(),
            groups: Vec::new(),
            ..current.clone()
        });
        tracing::info!(changed = commit.changed(), "Registry cleared");
    }

    fn allocate_inlet_port(&self, snapshot: &Snapshot) -> Result<u16, EngineError> {
        let used: HashSet<u16> = snapshot.used_endpoints().map(|(_, port)| port).collect();
        (self.inlets.port_range_start..=self.inlets.port_range_end)
            .find(|port| !used.contains(port))
            .ok_or_else(|| {
                EngineError::invalid(format!(
                    "no free inlet port in {}..={}",
                    self.inlets.port_range_start, self.inlets.port_range_end
                ))
            })
    }
}

fn find_local_mut<'a>(snapshot: &'a mut Snapshot, name: &str) -> Result<&'a mut LocalService, EngineError> {
    snapshot
        .local_services
        .iter_mut()
        .find(|s| s.name == name)
        .ok_or_else(|| EngineError::not_found("service", name))
}

fn find_group_mut<'a>(snapshot: &'a mut Snapshot, email: &str) -> Result<&'a mut ServiceGroup, EngineError> {
    snapshot
        .groups
        .iter_mut()
        .find(|g| g.email == email)
        .ok_or_else(|| EngineError::not_found("group", email))
}

fn group_entry<'a>(snapshot: &'a mut Snapshot, email: &str) -> &'a mut ServiceGroup {
    let index = match snapshot.groups.iter().position(|g| g.email == email) {
        Some(index) => index,
        None => {
            snapshot.groups.push(ServiceGroup::new(email));
            snapshot.groups.len() - 1
        }
    };
    &mut snapshot.groups[index]
}

fn take_invite(group: &mut ServiceGroup, invite_id: &str) -> Result<Invite, EngineError> {
    let index = group
        .invites
        .iter()
        .position(|i| i.id == invite_id)
        .ok_or_else(|| EngineError::not_found("invite", invite_id))?;
    Ok(group.invites.remove(index))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::invalid("service name must not be empty"));
    }
    Ok(())
}

fn validate_endpoint(address: &str, port: u16) -> Result<(), EngineError> {
    if address.trim().is_empty() {
        return Err(EngineError::invalid("address must not be empty"));
    }
    if port == 0 {
        return Err(EngineError::invalid("port must be between 1 and 65535"));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), EngineError> {
    match email.split_once('@') {
        Some((user, domain)) if !user.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(EngineError::invalid(format!("'{}' is not an email address", email))),
    }
}
