//! Typed views of the documents returned by `one* show --json` and
//! `one* list --json`.
//!
//! Only the fields the installer reads are modelled; everything else in the
//! documents is ignored. Numeric fields are string-encoded by the backend and
//! repeated XML elements collapse to a single object when there is only one
//! of them, so both shapes are accepted throughout.

use std::collections::BTreeMap;

use sandbox_core::ids::{
    deserialize_u64, ApplianceId, DatastoreId, GroupId, ImageId, MarketplaceId, NetworkId,
    ServiceId, ServiceTemplateId, TemplateId, UserId, VmId,
};
use sandbox_core::types::{ApplianceKind, EntityKind, ImageState, RoleState};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::Result;

/// A backend entity that can be shown or listed.
pub trait OneEntity: DeserializeOwned + Send + Sync {
    /// Entity kind; selects the command line tool and JSON roots.
    const KIND: EntityKind;

    /// Raw numeric id.
    fn id(&self) -> u64;

    /// Entity name.
    fn name(&self) -> &str;
}

macro_rules! one_entity {
    ($type:ty, $kind:expr) => {
        impl OneEntity for $type {
            const KIND: EntityKind = $kind;

            fn id(&self) -> u64 {
                self.id.get()
            }

            fn name(&self) -> &str {
                &self.name
            }
        }
    };
}

/// Deserialize an element that may be absent, a single object or an array.
pub fn deserialize_one_or_many<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        Some(OneOrMany::Many(items)) => items,
        Some(OneOrMany::One(item)) => vec![item],
        None => Vec::new(),
    })
}

/// Deserialize a small numeric code (state, type) that may be string-encoded.
pub fn deserialize_code<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = deserialize_u64(deserializer)?;
    u8::try_from(raw).map_err(|_| D::Error::custom(format!("code {raw} out of range")))
}

/// Deserialize a template section into string values, dropping nested
/// vectors and null values.
pub fn deserialize_string_map<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<BTreeMap<String, Value>> = Option::deserialize(deserializer)?;
    Ok(value
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| value_to_string(value).map(|v| (key, v)))
        .collect())
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

const fn default_cardinality() -> u32 {
    1
}

/// Owner fields shared by every owned document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct EntityOwner {
    /// Owning user
    #[serde(rename = "UID")]
    pub uid: UserId,

    /// Owning group
    #[serde(rename = "GID")]
    pub gid: GroupId,
}

/// Disk image.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Image {
    /// Image id
    #[serde(rename = "ID")]
    pub id: ImageId,

    /// Image name
    #[serde(rename = "NAME")]
    pub name: String,

    /// Owning user
    #[serde(rename = "UID")]
    pub uid: UserId,

    /// Owning group
    #[serde(rename = "GID")]
    pub gid: GroupId,

    /// Raw state code
    #[serde(rename = "STATE", deserialize_with = "deserialize_code")]
    pub state_code: u8,
}

impl Image {
    /// Decoded state.
    ///
    /// # Errors
    ///
    /// Returns an error for state codes outside the known range.
    pub fn state(&self) -> Result<ImageState> {
        ImageState::from_code(self.state_code)
    }
}

one_entity!(Image, EntityKind::Image);

/// Disk of a VM template.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Disk {
    /// Image referenced by id
    #[serde(rename = "IMAGE_ID", default)]
    pub image_id: Option<ImageId>,

    /// Image referenced by name
    #[serde(rename = "IMAGE", default)]
    pub image: Option<String>,
}

/// Attribute section of a VM template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TemplateSection {
    /// Disks, in order
    #[serde(rename = "DISK", default, deserialize_with = "deserialize_one_or_many")]
    pub disks: Vec<Disk>,
}

/// VM template.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Template {
    /// Template id
    #[serde(rename = "ID")]
    pub id: TemplateId,

    /// Template name
    #[serde(rename = "NAME")]
    pub name: String,

    /// Owning user
    #[serde(rename = "UID")]
    pub uid: UserId,

    /// Owning group
    #[serde(rename = "GID")]
    pub gid: GroupId,

    /// Template attributes
    #[serde(rename = "TEMPLATE", default)]
    pub template: TemplateSection,
}

impl Template {
    /// Image ids referenced by id, in disk order.
    #[must_use]
    pub fn image_ids(&self) -> Vec<ImageId> {
        self.template.disks.iter().filter_map(|d| d.image_id).collect()
    }
}

one_entity!(Template, EntityKind::Template);

/// Role declared by a service template.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoleDefinition {
    /// Role name
    pub name: String,

    /// VM template instantiated for the role
    #[serde(alias = "template_id")]
    pub vm_template: TemplateId,

    /// Number of VMs
    #[serde(default = "default_cardinality")]
    pub cardinality: u32,
}

/// Flow document body of a service template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServiceTemplateBody {
    /// Roles, in deployment order
    #[serde(default)]
    pub roles: Vec<RoleDefinition>,

    /// Custom attribute name to attribute specification
    #[serde(default)]
    pub custom_attrs: BTreeMap<String, String>,

    /// Network slot name to network specification
    #[serde(default)]
    pub networks: BTreeMap<String, String>,
}

/// Template section of a service template document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceTemplateSection {
    /// Flow document
    #[serde(rename = "BODY")]
    pub body: ServiceTemplateBody,
}

/// Multi-role service template.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceTemplate {
    /// Service template id
    #[serde(rename = "ID")]
    pub id: ServiceTemplateId,

    /// Service template name
    #[serde(rename = "NAME")]
    pub name: String,

    /// Owning user
    #[serde(rename = "UID")]
    pub uid: UserId,

    /// Owning group
    #[serde(rename = "GID")]
    pub gid: GroupId,

    /// Document body
    #[serde(rename = "TEMPLATE")]
    pub template: ServiceTemplateSection,
}

impl ServiceTemplate {
    /// Shortcut to the flow document.
    #[must_use]
    pub const fn body(&self) -> &ServiceTemplateBody {
        &self.template.body
    }

    /// VM template ids of every role, without duplicates, in role order.
    #[must_use]
    pub fn template_ids(&self) -> Vec<TemplateId> {
        let mut ids: Vec<TemplateId> = Vec::new();
        for role in &self.template.body.roles {
            if !ids.contains(&role.vm_template) {
                ids.push(role.vm_template);
            }
        }
        ids
    }
}

one_entity!(ServiceTemplate, EntityKind::ServiceTemplate);

/// Network interface of a VM.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Nic {
    /// IPv4 address
    #[serde(rename = "IP", default)]
    pub ip: Option<String>,

    /// Network name
    #[serde(rename = "NETWORK", default)]
    pub network: Option<String>,
}

/// Attribute section of a VM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VmSection {
    /// Network interfaces
    #[serde(rename = "NIC", default, deserialize_with = "deserialize_one_or_many")]
    pub nics: Vec<Nic>,
}

/// Virtual machine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Vm {
    /// VM id
    #[serde(rename = "ID")]
    pub id: VmId,

    /// VM name
    #[serde(rename = "NAME")]
    pub name: String,

    /// Owning user
    #[serde(rename = "UID")]
    pub uid: UserId,

    /// Owning group
    #[serde(rename = "GID")]
    pub gid: GroupId,

    /// User template values, including those published by the guest
    #[serde(rename = "USER_TEMPLATE", default, deserialize_with = "deserialize_string_map")]
    pub user_template: BTreeMap<String, String>,

    /// VM attributes
    #[serde(rename = "TEMPLATE", default)]
    pub template: VmSection,
}

impl Vm {
    /// IP addresses of every NIC, in order.
    #[must_use]
    pub fn ips(&self) -> Vec<String> {
        self.template.nics.iter().filter_map(|n| n.ip.clone()).collect()
    }
}

one_entity!(Vm, EntityKind::Vm);

/// Wrapper around the VM document embedded in a service node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VmInfo {
    /// The VM
    #[serde(rename = "VM")]
    pub vm: Vm,
}

/// One VM of a service role.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoleNode {
    /// VM id as reported by the flow service
    #[serde(default)]
    pub deploy_id: Option<i64>,

    /// VM document; absent while the VM is being created
    #[serde(default)]
    pub vm_info: Option<VmInfo>,
}

/// Role of an instantiated service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceRole {
    /// Role name
    pub name: String,

    /// Raw state code
    #[serde(rename = "state", deserialize_with = "deserialize_code")]
    pub state_code: u8,

    /// Number of VMs
    #[serde(default = "default_cardinality")]
    pub cardinality: u32,

    /// VMs of the role
    #[serde(default)]
    pub nodes: Vec<RoleNode>,
}

impl ServiceRole {
    /// Decoded state.
    #[must_use]
    pub const fn state(&self) -> RoleState {
        RoleState::from_code(self.state_code)
    }

    /// VM documents of the role that are already available.
    pub fn vms(&self) -> impl Iterator<Item = &Vm> {
        self.nodes
            .iter()
            .filter_map(|n| n.vm_info.as_ref().map(|info| &info.vm))
    }
}

/// Flow document body of a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServiceBody {
    /// Raw service state code
    #[serde(rename = "state", deserialize_with = "deserialize_code")]
    pub state_code: u8,

    /// Roles
    #[serde(default)]
    pub roles: Vec<ServiceRole>,
}

/// Template section of a service document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceSection {
    /// Flow document
    #[serde(rename = "BODY")]
    pub body: ServiceBody,
}

/// Instantiated service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Service {
    /// Service id
    #[serde(rename = "ID")]
    pub id: ServiceId,

    /// Service name
    #[serde(rename = "NAME")]
    pub name: String,

    /// Owning user
    #[serde(rename = "UID")]
    pub uid: UserId,

    /// Owning group
    #[serde(rename = "GID")]
    pub gid: GroupId,

    /// Document body
    #[serde(rename = "TEMPLATE")]
    pub template: ServiceSection,
}

impl Service {
    /// Decoded service state.
    #[must_use]
    pub const fn state(&self) -> RoleState {
        RoleState::from_code(self.template.body.state_code)
    }

    /// Roles of the service.
    #[must_use]
    pub fn roles(&self) -> &[ServiceRole] {
        &self.template.body.roles
    }

    /// Find a role by name.
    #[must_use]
    pub fn role(&self, name: &str) -> Option<&ServiceRole> {
        self.roles().iter().find(|r| r.name == name)
    }

    /// True when every role reports running.
    #[must_use]
    pub fn all_roles_running(&self) -> bool {
        !self.roles().is_empty() && self.roles().iter().all(|r| r.state().is_running())
    }

    /// First role in a failure state, if any.
    #[must_use]
    pub fn failed_role(&self) -> Option<&ServiceRole> {
        self.roles().iter().find(|r| r.state().is_failed())
    }

    /// Ids of every VM across all roles.
    #[must_use]
    pub fn vm_ids(&self) -> Vec<VmId> {
        self.roles()
            .iter()
            .flat_map(ServiceRole::vms)
            .map(|vm| vm.id)
            .collect()
    }
}

one_entity!(Service, EntityKind::Service);

/// Attribute section of a marketplace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MarketplaceSection {
    /// Catalog endpoint
    #[serde(rename = "ENDPOINT", default)]
    pub endpoint: Option<String>,

    /// Driver
    #[serde(rename = "MARKET_MAD", default)]
    pub market_mad: Option<String>,
}

/// Ids of the appliances a marketplace currently lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MarketplaceApps {
    /// Appliance ids
    #[serde(rename = "ID", default, deserialize_with = "deserialize_one_or_many")]
    pub ids: Vec<ApplianceId>,
}

/// Appliance marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Marketplace {
    /// Marketplace id
    #[serde(rename = "ID")]
    pub id: MarketplaceId,

    /// Marketplace name
    #[serde(rename = "NAME")]
    pub name: String,

    /// Marketplace attributes
    #[serde(rename = "TEMPLATE", default)]
    pub template: MarketplaceSection,

    /// Appliances indexed so far
    #[serde(rename = "MARKETPLACEAPPS", default)]
    pub apps: MarketplaceApps,
}

one_entity!(Marketplace, EntityKind::Marketplace);

/// Appliance published in a marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MarketApp {
    /// Appliance id
    #[serde(rename = "ID")]
    pub id: ApplianceId,

    /// Appliance name
    #[serde(rename = "NAME")]
    pub name: String,

    /// Raw appliance type code
    #[serde(rename = "TYPE", deserialize_with = "deserialize_code")]
    pub type_code: u8,

    /// Name of the owning marketplace
    #[serde(rename = "MARKETPLACE")]
    pub marketplace: String,

    /// Id of the owning marketplace
    #[serde(rename = "MARKETPLACE_ID")]
    pub marketplace_id: MarketplaceId,
}

impl MarketApp {
    /// What the appliance exports into.
    ///
    /// # Errors
    ///
    /// Returns an error for type codes the installer does not handle.
    pub fn kind(&self) -> Result<ApplianceKind> {
        ApplianceKind::from_code(self.type_code)
    }
}

one_entity!(MarketApp, EntityKind::Appliance);

/// User account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    /// User id
    #[serde(rename = "ID")]
    pub id: UserId,

    /// Login name
    #[serde(rename = "NAME")]
    pub name: String,

    /// Primary group
    #[serde(rename = "GID")]
    pub gid: GroupId,

    /// User template
    #[serde(rename = "TEMPLATE", default, deserialize_with = "deserialize_string_map")]
    pub template: BTreeMap<String, String>,
}

impl User {
    /// Public keys currently authorized for the user, one per line.
    #[must_use]
    pub fn ssh_public_keys(&self) -> Vec<&str> {
        self.template
            .get("SSH_PUBLIC_KEY")
            .map(|keys| {
                keys.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

one_entity!(User, EntityKind::User);

/// Id list element (`<ADMINS><ID>..</ID></ADMINS>`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserIdList {
    /// User ids
    #[serde(rename = "ID", default, deserialize_with = "deserialize_one_or_many")]
    pub ids: Vec<UserId>,
}

/// User group.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Group {
    /// Group id
    #[serde(rename = "ID")]
    pub id: GroupId,

    /// Group name
    #[serde(rename = "NAME")]
    pub name: String,

    /// Group members
    #[serde(rename = "USERS", default)]
    pub users: UserIdList,

    /// Group administrators
    #[serde(rename = "ADMINS", default)]
    pub admins: UserIdList,
}

impl Group {
    /// Check whether `user` administers the group.
    #[must_use]
    pub fn is_admin(&self, user: UserId) -> bool {
        self.admins.ids.contains(&user)
    }
}

one_entity!(Group, EntityKind::Group);

/// Storage datastore.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Datastore {
    /// Datastore id
    #[serde(rename = "ID")]
    pub id: DatastoreId,

    /// Datastore name
    #[serde(rename = "NAME")]
    pub name: String,
}

one_entity!(Datastore, EntityKind::Datastore);

/// Virtual network.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VirtualNetwork {
    /// Network id
    #[serde(rename = "ID")]
    pub id: NetworkId,

    /// Network name
    #[serde(rename = "NAME")]
    pub name: String,
}

one_entity!(VirtualNetwork, EntityKind::VirtualNetwork);

/// Ids produced by a marketplace export, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactIds {
    /// Images
    pub images: Vec<ImageId>,
    /// VM templates
    pub templates: Vec<TemplateId>,
    /// Service templates
    pub service_templates: Vec<ServiceTemplateId>,
}

impl ArtifactIds {
    /// True when nothing was produced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.templates.is_empty() && self.service_templates.is_empty()
    }

    /// Total number of ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.images.len() + self.templates.len() + self.service_templates.len()
    }
}
