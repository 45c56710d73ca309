//! Service instantiation and role outputs.

use std::collections::BTreeMap;

use sandbox_core::ids::{NetworkId, ServiceId, ServiceTemplateId, VmId};
use sandbox_core::prompt::Prompter;
use sandbox_core::types::EntityKind;
use sandbox_core::wait::{poll_until, Progress, WaitPolicy};
use sandbox_core::Error;
use sandbox_one::{
    EntityResolver, Lookup, OneClient, Service, ServiceTemplate, VirtualNetwork,
};
use serde_json::{json, Value};
use tracing::info;

use crate::attributes::NetworkSlot;
use crate::providers::AttributeResolver;
use crate::Result;

/// Everything needed to instantiate a service template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    /// Template to instantiate
    pub template: ServiceTemplateId,
    /// Name of the new service
    pub service_name: String,
    /// Custom attribute values
    pub attributes: BTreeMap<String, String>,
    /// Network slot bindings
    pub networks: Vec<(String, NetworkId)>,
}

impl ServiceRequest {
    /// Extra template submitted with the instantiation.
    #[must_use]
    pub fn payload(&self) -> Value {
        let networks: Vec<Value> = self
            .networks
            .iter()
            .map(|(slot, id)| json!({ slot.as_str(): { "id": id.to_string() } }))
            .collect();
        json!({
            "service_name": self.service_name,
            "custom_attrs_values": self.attributes,
            "networks_values": networks,
        })
    }
}

/// One VM of a role, as seen after deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmOutput {
    /// VM id
    pub id: VmId,
    /// VM name
    pub name: String,
    /// Values the guest published in its user template
    pub user_template: BTreeMap<String, String>,
    /// NIC addresses
    pub ips: Vec<String>,
}

/// Outputs of every VM of a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleOutputs {
    /// Role name
    pub role: String,
    /// VMs in node order
    pub vms: Vec<VmOutput>,
}

impl RoleOutputs {
    /// First value of `key` published by any VM of the role.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&str> {
        self.vms
            .iter()
            .find_map(|vm| vm.user_template.get(key).filter(|v| !v.is_empty()))
            .map(String::as_str)
    }

    /// First address of the first VM.
    #[must_use]
    pub fn first_ip(&self) -> Option<&str> {
        self.vms
            .iter()
            .flat_map(|vm| vm.ips.iter())
            .next()
            .map(String::as_str)
    }
}

/// Instantiates service templates and waits for them to run.
#[derive(Debug, Clone)]
pub struct ServiceInstantiator {
    client: OneClient,
    resolver: EntityResolver,
    policy: WaitPolicy,
}

impl ServiceInstantiator {
    /// Create an instantiator polling with `policy`.
    #[must_use]
    pub fn new(client: OneClient, policy: WaitPolicy) -> Self {
        Self {
            resolver: EntityResolver::new(client.clone()),
            client,
            policy,
        }
    }

    /// Resolve attribute values and network bindings for `template_name`.
    ///
    /// Network slots are bound through `bindings` (slot name to virtual
    /// network name); unbound slots are offered to the operator as a choice
    /// among existing virtual networks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for a missing template or network,
    /// [`Error::InvalidAttributeSpec`] for malformed declarations and
    /// propagates prompt failures.
    pub async fn prepare(
        &self,
        template_name: &str,
        service_name: &str,
        attributes: &AttributeResolver,
        bindings: &BTreeMap<String, String>,
        prompter: &dyn Prompter,
    ) -> Result<ServiceRequest> {
        let template: ServiceTemplate = self.resolver.require(&Lookup::name(template_name)).await?;
        let body = template.body();

        let values = attributes.resolve(&body.custom_attrs, prompter)?;
        let networks = self.bind_networks(&body.networks, bindings, prompter).await?;

        Ok(ServiceRequest {
            template: template.id,
            service_name: service_name.to_string(),
            attributes: values,
            networks,
        })
    }

    async fn bind_networks(
        &self,
        slots: &BTreeMap<String, String>,
        bindings: &BTreeMap<String, String>,
        prompter: &dyn Prompter,
    ) -> Result<Vec<(String, NetworkId)>> {
        if slots.is_empty() {
            return Ok(Vec::new());
        }
        let vnets: Vec<VirtualNetwork> = self.resolver.list().await?;

        let mut bound = Vec::with_capacity(slots.len());
        for (name, spec) in slots {
            let slot = NetworkSlot::parse(name, spec)?;
            let network = match bindings.get(&slot.name) {
                Some(network) => network.clone(),
                None => {
                    if vnets.is_empty() {
                        return Err(Error::NotFound(format!(
                            "virtual network for slot `{}`",
                            slot.name
                        )));
                    }
                    prompter.select(
                        &format!("Virtual network for {} ({})", slot.description, slot.name),
                        vnets.iter().map(|v| v.name.clone()).collect(),
                    )?
                }
            };
            let vnet = vnets
                .iter()
                .find(|v| v.name == network)
                .ok_or_else(|| Error::NotFound(format!("virtual network `{network}`")))?;
            info!(slot = %slot.name, network = %vnet.name, id = %vnet.id, "network slot bound");
            bound.push((slot.name, vnet.id));
        }
        Ok(bound)
    }

    /// Submit `request` and wait until every role runs.
    ///
    /// # Errors
    ///
    /// Fails when the instantiation is rejected, a role reaches a failure
    /// state ([`Error::EntityFailed`]) or a bounded policy runs out
    /// ([`Error::Timeout`]).
    pub async fn instantiate(&self, request: &ServiceRequest) -> Result<Service> {
        let id = self
            .client
            .instantiate_service(request.template, &request.payload())
            .await?;
        info!(service = %request.service_name, id = %id, "service instantiated");
        self.wait_running(id).await
    }

    /// Poll a service until every role runs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EntityFailed`] when a role fails,
    /// [`Error::MalformedResponse`] when the service lists no roles and
    /// [`Error::Timeout`] when a bounded policy runs out.
    pub async fn wait_running(&self, id: ServiceId) -> Result<Service> {
        let service = poll_until(&self.policy, &format!("service {id}"), || {
            self.service_progress(id)
        })
        .await?;
        info!(service = %service.name, id = %id, "all roles running");
        Ok(service)
    }

    /// Find a service by name and wait for it to run.
    ///
    /// # Errors
    ///
    /// Same as [`ServiceInstantiator::wait_running`].
    pub async fn find_running(&self, name: &str) -> Result<Option<Service>> {
        match self.resolver.resolve::<Service>(&Lookup::name(name)).await? {
            Some(existing) => {
                info!(service = name, id = %existing.id, "service already instantiated");
                self.wait_running(existing.id).await.map(Some)
            }
            None => Ok(None),
        }
    }

    async fn service_progress(&self, id: ServiceId) -> Result<Progress<Service>> {
        let service: Service = self.resolver.require(&Lookup::id(id)).await?;
        if service.roles().is_empty() {
            return Err(Error::malformed(format!("service {id}"), "roles"));
        }
        if let Some(role) = service.failed_role() {
            return Err(Error::EntityFailed {
                kind: EntityKind::Service,
                id: id.get(),
                state: format!("{} (role {})", role.state().as_string(), role.name),
            });
        }
        if service.all_roles_running() {
            return Ok(Progress::Done(service));
        }
        let summary = service
            .roles()
            .iter()
            .map(|r| format!("{}={}", r.name, r.state().as_string()))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(Progress::Pending(summary))
    }
}

/// Outputs of `role` of a running service.
///
/// # Errors
///
/// Returns [`Error::NotFound`] when the service has no such role.
pub fn role_outputs(service: &Service, role: &str) -> Result<RoleOutputs> {
    let found = service
        .role(role)
        .ok_or_else(|| Error::NotFound(format!("role `{role}` of service {}", service.id)))?;
    Ok(RoleOutputs {
        role: found.name.clone(),
        vms: found
            .vms()
            .map(|vm| VmOutput {
                id: vm.id,
                name: vm.name.clone(),
                user_template: vm.user_template.clone(),
                ips: vm.ips(),
            })
            .collect(),
    })
}
