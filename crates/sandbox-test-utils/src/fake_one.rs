//! In-memory OpenNebula front-end.
//!
//! `FakeOne` implements [`CommandExecutor`] and answers the subset of the
//! `one*` command line the installer uses, keeping every entity as the same
//! JSON document the real tools print. Images start `LOCKED` and become
//! `READY` after a configurable number of `show` polls; services start
//! `DEPLOYING` and reach `RUNNING` the same way. Appliances of a marketplace
//! created during the test only become visible after a front-end restart.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sandbox_core::backend::{CommandExecutor, CommandOutput};
use sandbox_core::types::{ApplianceKind, EntityKind};
use sandbox_core::Result;
use serde_json::{json, Value};

const STATE_LOCKED: &str = "4";
const STATE_READY: &str = "1";
const STATE_ERROR: &str = "5";
const ROLE_DEPLOYING: u64 = 1;
const ROLE_RUNNING: u64 = 2;
const ROLE_FAILED_DEPLOYING: u64 = 7;
const VAULT_HEADER: &str = "$ANSIBLE_VAULT;1.1;AES256";

/// Appliance published in a simulated marketplace.
#[derive(Debug, Clone)]
pub struct CatalogApp {
    pub name: String,
    pub kind: ApplianceKind,
    /// Names of the images produced by an export, in disk order
    pub disks: Vec<String>,
    /// Role name and its disk image names (service appliances)
    pub roles: Vec<(String, Vec<String>)>,
    pub custom_attrs: BTreeMap<String, String>,
    pub networks: BTreeMap<String, String>,
}

impl CatalogApp {
    /// Image appliance; the export names its image after the requested name.
    pub fn image(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ApplianceKind::Image,
            disks: Vec::new(),
            roles: Vec::new(),
            custom_attrs: BTreeMap::new(),
            networks: BTreeMap::new(),
        }
    }

    /// VM appliance whose export produces one image per disk.
    pub fn vm(name: &str, disks: &[&str]) -> Self {
        Self {
            kind: ApplianceKind::Vm,
            disks: disks.iter().map(ToString::to_string).collect(),
            ..Self::image(name)
        }
    }

    /// Service appliance; each role gets its own template and images.
    pub fn service(name: &str, roles: &[(&str, &[&str])]) -> Self {
        Self {
            kind: ApplianceKind::Service,
            roles: roles
                .iter()
                .map(|(role, disks)| {
                    (
                        (*role).to_string(),
                        disks.iter().map(ToString::to_string).collect(),
                    )
                })
                .collect(),
            ..Self::image(name)
        }
    }

    /// Name the exported image(s) explicitly.
    #[must_use]
    pub fn with_disks(mut self, disks: &[&str]) -> Self {
        self.disks = disks.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn with_custom_attr(mut self, key: &str, spec: &str) -> Self {
        self.custom_attrs.insert(key.to_string(), spec.to_string());
        self
    }

    #[must_use]
    pub fn with_network(mut self, slot: &str, spec: &str) -> Self {
        self.networks.insert(slot.to_string(), spec.to_string());
        self
    }

    const fn type_code(&self) -> u8 {
        match self.kind {
            ApplianceKind::Image => 1,
            ApplianceKind::Vm => 2,
            ApplianceKind::Service => 3,
        }
    }
}

#[derive(Debug)]
struct Store {
    docs: BTreeMap<u64, Value>,
    next_id: u64,
}

impl Store {
    const fn starting_at(next_id: u64) -> Self {
        Self {
            docs: BTreeMap::new(),
            next_id,
        }
    }

    fn insert(&mut self, mut doc: Value) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        doc["ID"] = json!(id.to_string());
        self.docs.insert(id, doc);
        id
    }

    fn find(&self, target: &str) -> Option<u64> {
        if let Ok(id) = target.parse::<u64>() {
            if self.docs.contains_key(&id) {
                return Some(id);
            }
        }
        self.docs
            .iter()
            .find(|(_, doc)| doc["NAME"] == target)
            .map(|(id, _)| *id)
    }
}

#[derive(Debug)]
struct State {
    stores: HashMap<EntityKind, Store>,
    image_polls: HashMap<u64, (u32, &'static str)>,
    service_polls: HashMap<u64, u32>,
    pending_apps: Vec<(String, CatalogApp)>,
    apps: HashMap<u64, CatalogApp>,
    polls_until_ready: u32,
    failing_exports: HashSet<String>,
    failing_image_apps: HashSet<String>,
    failing_chowns: HashSet<(EntityKind, u64)>,
    failing_roles: HashSet<String>,
    role_outputs: HashMap<String, BTreeMap<String, String>>,
    acl_rules: Vec<String>,
    payloads: Vec<Value>,
    vault_passwords: Vec<String>,
    calls: Vec<String>,
    restarts: u32,
    backend_down: bool,
}

impl State {
    fn seeded() -> Self {
        let mut stores = HashMap::new();
        stores.insert(EntityKind::User, Store::starting_at(0));
        stores.insert(EntityKind::Group, Store::starting_at(0));
        stores.insert(EntityKind::Datastore, Store::starting_at(0));
        stores.insert(EntityKind::VirtualNetwork, Store::starting_at(0));
        stores.insert(EntityKind::Image, Store::starting_at(0));
        stores.insert(EntityKind::Template, Store::starting_at(0));
        stores.insert(EntityKind::ServiceTemplate, Store::starting_at(0));
        stores.insert(EntityKind::Service, Store::starting_at(0));
        stores.insert(EntityKind::Marketplace, Store::starting_at(0));
        stores.insert(EntityKind::Appliance, Store::starting_at(0));
        stores.insert(EntityKind::Vm, Store::starting_at(0));

        let mut state = Self {
            stores,
            image_polls: HashMap::new(),
            service_polls: HashMap::new(),
            pending_apps: Vec::new(),
            apps: HashMap::new(),
            polls_until_ready: 2,
            failing_exports: HashSet::new(),
            failing_image_apps: HashSet::new(),
            failing_chowns: HashSet::new(),
            failing_roles: HashSet::new(),
            role_outputs: HashMap::new(),
            acl_rules: Vec::new(),
            payloads: Vec::new(),
            vault_passwords: Vec::new(),
            calls: Vec::new(),
            restarts: 0,
            backend_down: false,
        };

        state.store(EntityKind::Group).insert(json!({
            "NAME": "oneadmin", "USERS": {"ID": "0"}, "ADMINS": {}
        }));
        state.store(EntityKind::Group).insert(json!({
            "NAME": "users", "USERS": {}, "ADMINS": {}
        }));
        state.store(EntityKind::Group).next_id = 100;
        state.store(EntityKind::User).insert(json!({
            "NAME": "oneadmin", "GID": "0", "GNAME": "oneadmin", "TEMPLATE": {}
        }));
        state.store(EntityKind::User).next_id = 2;
        state
            .store(EntityKind::Datastore)
            .insert(json!({"NAME": "system"}));
        state
            .store(EntityKind::Datastore)
            .insert(json!({"NAME": "default"}));
        state.store(EntityKind::Marketplace).insert(json!({
            "NAME": "OpenNebula Public",
            "TEMPLATE": {"ENDPOINT": "https://marketplace.opennebula.io", "MARKET_MAD": "one"},
            "MARKETPLACEAPPS": {}
        }));
        state.store(EntityKind::Marketplace).next_id = 100;
        state
    }

    fn store(&mut self, kind: EntityKind) -> &mut Store {
        self.stores
            .entry(kind)
            .or_insert_with(|| Store::starting_at(0))
    }

    fn doc(&self, kind: EntityKind, id: u64) -> Option<&Value> {
        self.stores.get(&kind).and_then(|s| s.docs.get(&id))
    }

    fn doc_mut(&mut self, kind: EntityKind, id: u64) -> Option<&mut Value> {
        self.stores.get_mut(&kind).and_then(|s| s.docs.get_mut(&id))
    }

    fn find(&self, kind: EntityKind, target: &str) -> Option<u64> {
        self.stores.get(&kind).and_then(|s| s.find(target))
    }

    fn handle(&mut self, program: &str, args: &[String]) -> CommandOutput {
        self.calls.push(render(program, args));

        match program {
            "which" => CommandOutput::success(format!(
                "/usr/bin/{}\n",
                args.first().map_or("", String::as_str)
            )),
            "systemctl" => self.restart(),
            "oneacl" => self.acl(args),
            "ansible-vault" => self.vault(args),
            _ => match kind_for(program) {
                Some(_) if self.backend_down => {
                    CommandOutput::failure(255, "Failed to open TCP connection: Connection refused")
                }
                Some(kind) => self.entity_command(kind, args),
                None => CommandOutput::failure(127, format!("{program}: command unavailable")),
            },
        }
    }

    fn entity_command(&mut self, kind: EntityKind, args: &[String]) -> CommandOutput {
        let (positional, options) = split_args(args);
        let sub = positional.first().map_or("", String::as_str);
        let rest: Vec<&str> = positional.iter().skip(1).map(String::as_str).collect();

        match (sub, kind) {
            ("list", _) => self.list(kind),
            ("show", EntityKind::User) if rest.is_empty() => self.show(kind, "0"),
            ("show", _) => match rest.first() {
                Some(target) => self.show(kind, target),
                None => CommandOutput::failure(255, "show: missing target"),
            },
            ("rename", _) => match rest.as_slice() {
                [target, name] => self.rename(kind, target, name),
                _ => usage("rename <id> <name>"),
            },
            ("chown", _) => match rest.as_slice() {
                [target, uid, gid] => self.chown(kind, target, uid, gid),
                _ => usage("chown <id> <uid> <gid>"),
            },
            ("create", EntityKind::Group) => match rest.first() {
                Some(name) => self.create_group(name),
                None => usage("create <name>"),
            },
            ("create", EntityKind::User) => match rest.first() {
                Some(name) => self.create_user(name),
                None => usage("create <name> <file> --read-file"),
            },
            ("create", EntityKind::Marketplace) => match rest.first() {
                Some(path) => self.create_marketplace(path),
                None => usage("create <file>"),
            },
            ("export", EntityKind::Appliance) => match rest.as_slice() {
                [app, name] => self.export(app, name, options.get("--datastore")),
                _ => usage("export <app> <name> --datastore <id>"),
            },
            ("instantiate", EntityKind::ServiceTemplate) => match rest.as_slice() {
                [target, path] => self.instantiate(target, path),
                _ => usage("instantiate <id> <file>"),
            },
            ("passwd", EntityKind::User) => match rest.first().and_then(|t| self.find(kind, t)) {
                Some(_) => CommandOutput::success(""),
                None => not_found(kind, rest.first().copied().unwrap_or("")),
            },
            ("chgrp", EntityKind::User) => match rest.as_slice() {
                [user, group] => self.chgrp(user, group),
                _ => usage("chgrp <user> <group>"),
            },
            ("update", EntityKind::User) => match rest.as_slice() {
                [user, path] => self.update_user(user, path),
                _ => usage("update <user> <file> --append"),
            },
            ("addadmin", EntityKind::Group) => match rest.as_slice() {
                [group, user] => self.add_admin(group, user),
                _ => usage("addadmin <group> <user>"),
            },
            _ => CommandOutput::failure(255, format!("Unsupported subcommand `{sub}`")),
        }
    }

    fn list(&self, kind: EntityKind) -> CommandOutput {
        let docs: Vec<Value> = self
            .stores
            .get(&kind)
            .map(|s| s.docs.values().cloned().collect())
            .unwrap_or_default();
        let pool = match docs.len() {
            0 => json!({}),
            1 => json!({ kind.json_root(): docs[0] }),
            _ => json!({ kind.json_root(): docs }),
        };
        CommandOutput::success(json!({ kind.pool_root(): pool }).to_string())
    }

    fn show(&mut self, kind: EntityKind, target: &str) -> CommandOutput {
        let Some(id) = self.find(kind, target) else {
            return not_found(kind, target);
        };
        match kind {
            EntityKind::Image => self.advance_image(id),
            EntityKind::Service => self.advance_service(id),
            _ => {}
        }
        let doc = self.doc(kind, id).cloned().unwrap_or(Value::Null);
        CommandOutput::success(json!({ kind.json_root(): doc }).to_string())
    }

    fn rename(&mut self, kind: EntityKind, target: &str, name: &str) -> CommandOutput {
        let Some(id) = self.find(kind, target) else {
            return not_found(kind, target);
        };
        if let Some(doc) = self.doc_mut(kind, id) {
            doc["NAME"] = json!(name);
        }
        CommandOutput::success("")
    }

    fn chown(&mut self, kind: EntityKind, target: &str, uid: &str, gid: &str) -> CommandOutput {
        let Some(id) = self.find(kind, target) else {
            return not_found(kind, target);
        };
        if self.failing_chowns.contains(&(kind, id)) {
            return CommandOutput::failure(
                255,
                format!("[one.{}.chown] User [0] : Not authorized to perform MANAGE", tool_name(kind)),
            );
        }
        if let Some(doc) = self.doc_mut(kind, id) {
            doc["UID"] = json!(uid);
            doc["GID"] = json!(gid);
        }
        CommandOutput::success("")
    }

    fn create_group(&mut self, name: &str) -> CommandOutput {
        if self.find(EntityKind::Group, name).is_some() {
            return CommandOutput::failure(255, "[one.group.allocate] NAME is already taken");
        }
        let id = self
            .store(EntityKind::Group)
            .insert(json!({"NAME": name, "USERS": {}, "ADMINS": {}}));
        CommandOutput::success(format!("ID: {id}\n"))
    }

    fn create_user(&mut self, name: &str) -> CommandOutput {
        if self.find(EntityKind::User, name).is_some() {
            return CommandOutput::failure(255, "[one.user.allocate] NAME is already taken");
        }
        let id = self.store(EntityKind::User).insert(json!({
            "NAME": name, "GID": "1", "GNAME": "users", "TEMPLATE": {}
        }));
        CommandOutput::success(format!("ID: {id}\n"))
    }

    fn create_marketplace(&mut self, path: &str) -> CommandOutput {
        let Ok(body) = std::fs::read_to_string(path) else {
            return CommandOutput::failure(255, format!("Cannot read {path}"));
        };
        let attrs = parse_template(&body);
        let Some(name) = attrs.get("NAME") else {
            return CommandOutput::failure(255, "[one.market.allocate] No NAME in template");
        };
        let id = self.store(EntityKind::Marketplace).insert(json!({
            "NAME": name,
            "TEMPLATE": {
                "ENDPOINT": attrs.get("ENDPOINT"),
                "MARKET_MAD": attrs.get("MARKET_MAD"),
                "DESCRIPTION": attrs.get("DESCRIPTION"),
            },
            "MARKETPLACEAPPS": {}
        }));
        CommandOutput::success(format!("ID: {id}\n"))
    }

    fn export(&mut self, app: &str, name: &str, datastore: Option<&String>) -> CommandOutput {
        let Some(app_id) = self.find(EntityKind::Appliance, app) else {
            return not_found(EntityKind::Appliance, app);
        };
        let Some(catalog) = self.apps.get(&app_id).cloned() else {
            return not_found(EntityKind::Appliance, app);
        };
        let Some(datastore) = datastore.and_then(|d| self.find(EntityKind::Datastore, d)) else {
            return not_found(EntityKind::Datastore, datastore.map_or("", String::as_str));
        };
        if self.failing_exports.contains(&catalog.name) {
            return CommandOutput::failure(
                255,
                "[one.marketapp.export] Error downloading appliance: 404 Not Available",
            );
        }
        let fail = self.failing_image_apps.contains(&catalog.name);

        let mut images = Vec::new();
        let mut templates = Vec::new();
        let mut service_templates = Vec::new();

        match catalog.kind {
            ApplianceKind::Image => {
                let image_name = catalog.disks.first().map_or(name, String::as_str);
                let image = self.create_image(image_name, datastore, fail);
                images.push(image);
                templates.push(self.create_template(name, &[image]));
            }
            ApplianceKind::Vm => {
                let ids: Vec<u64> = catalog
                    .disks
                    .iter()
                    .map(|disk| self.create_image(disk, datastore, fail))
                    .collect();
                images.extend(&ids);
                templates.push(self.create_template(name, &ids));
            }
            ApplianceKind::Service => {
                let mut roles = Vec::new();
                for (role, disks) in &catalog.roles {
                    let ids: Vec<u64> = disks
                        .iter()
                        .map(|disk| self.create_image(disk, datastore, fail))
                        .collect();
                    images.extend(&ids);
                    let template = self.create_template(&format!("{name}-{role}"), &ids);
                    templates.push(template);
                    roles.push(json!({"name": role, "vm_template": template, "cardinality": 1}));
                }
                let id = self.store(EntityKind::ServiceTemplate).insert(json!({
                    "NAME": name, "UID": "0", "GID": "0",
                    "TEMPLATE": {"BODY": {
                        "name": name,
                        "roles": roles,
                        "custom_attrs": catalog.custom_attrs,
                        "networks": catalog.networks,
                    }}
                }));
                service_templates.push(id);
            }
        }

        let mut out = String::new();
        for (header, ids) in [
            ("IMAGE", &images),
            ("VMTEMPLATE", &templates),
            ("SERVICE_TEMPLATE", &service_templates),
        ] {
            if ids.is_empty() {
                continue;
            }
            out.push_str(header);
            out.push('\n');
            for id in ids {
                out.push_str(&format!("    ID: {id}\n"));
            }
        }
        CommandOutput::success(out)
    }

    fn create_image(&mut self, name: &str, datastore: u64, fail: bool) -> u64 {
        let final_state = if fail { STATE_ERROR } else { STATE_READY };
        let polls = self.polls_until_ready;
        let initial = if polls == 0 { final_state } else { STATE_LOCKED };
        let id = self.store(EntityKind::Image).insert(json!({
            "NAME": name, "UID": "0", "GID": "0", "STATE": initial,
            "DATASTORE_ID": datastore.to_string()
        }));
        if polls > 0 {
            self.image_polls.insert(id, (polls, final_state));
        }
        id
    }

    fn create_template(&mut self, name: &str, images: &[u64]) -> u64 {
        let disks: Vec<Value> = images
            .iter()
            .map(|id| json!({"IMAGE_ID": id.to_string()}))
            .collect();
        let disk = match disks.len() {
            0 => Value::Null,
            1 => disks[0].clone(),
            _ => Value::Array(disks),
        };
        let mut section = json!({});
        if !disk.is_null() {
            section["DISK"] = disk;
        }
        self.store(EntityKind::Template).insert(json!({
            "NAME": name, "UID": "0", "GID": "0", "TEMPLATE": section
        }))
    }

    fn advance_image(&mut self, id: u64) {
        let Some((remaining, final_state)) = self.image_polls.get_mut(&id) else {
            return;
        };
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            let final_state = *final_state;
            self.image_polls.remove(&id);
            if let Some(doc) = self.doc_mut(EntityKind::Image, id) {
                doc["STATE"] = json!(final_state);
            }
        }
    }

    fn instantiate(&mut self, target: &str, path: &str) -> CommandOutput {
        let Some(template_id) = self.find(EntityKind::ServiceTemplate, target) else {
            return not_found(EntityKind::ServiceTemplate, target);
        };
        let payload: Value = match std::fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
        {
            Some(payload) => payload,
            None => return CommandOutput::failure(255, format!("Cannot parse {path}")),
        };
        let Some(template) = self.doc(EntityKind::ServiceTemplate, template_id).cloned() else {
            return not_found(EntityKind::ServiceTemplate, target);
        };

        let name = payload["service_name"]
            .as_str()
            .map_or_else(|| template["NAME"].clone(), |n| json!(n));
        let roles: Vec<Value> = template["TEMPLATE"]["BODY"]["roles"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|role| {
                json!({
                    "name": role["name"],
                    "vm_template": role["vm_template"],
                    "cardinality": role.get("cardinality").cloned().unwrap_or(json!(1)),
                    "state": ROLE_DEPLOYING,
                    "nodes": []
                })
            })
            .collect();

        let id = self.store(EntityKind::Service).insert(json!({
            "NAME": name, "UID": "0", "GID": "0",
            "TEMPLATE": {"BODY": {
                "name": name,
                "state": ROLE_DEPLOYING,
                "roles": roles,
                "custom_attrs_values": payload["custom_attrs_values"],
                "networks_values": payload["networks_values"],
            }}
        }));
        self.payloads.push(payload);

        if self.polls_until_ready == 0 {
            self.finish_deployment(id);
        } else {
            self.service_polls.insert(id, self.polls_until_ready);
        }
        CommandOutput::success(format!("ID: {id}\n"))
    }

    fn advance_service(&mut self, id: u64) {
        let Some(remaining) = self.service_polls.get_mut(&id) else {
            return;
        };
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.service_polls.remove(&id);
            self.finish_deployment(id);
        }
    }

    fn finish_deployment(&mut self, id: u64) {
        let Some(service) = self.doc(EntityKind::Service, id).cloned() else {
            return;
        };
        let uid = service["UID"].clone();
        let gid = service["GID"].clone();
        let mut roles = service["TEMPLATE"]["BODY"]["roles"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        let mut failed = false;
        for role in &mut roles {
            let role_name = role["name"].as_str().unwrap_or_default().to_string();
            if self.failing_roles.contains(&role_name) {
                role["state"] = json!(ROLE_FAILED_DEPLOYING);
                failed = true;
                continue;
            }
            let cardinality = role["cardinality"].as_u64().unwrap_or(1);
            let outputs = self.role_outputs.get(&role_name).cloned().unwrap_or_default();
            let mut nodes = Vec::new();
            for index in 0..cardinality {
                let vm_id = self.store(EntityKind::Vm).next_id;
                let vm = json!({
                    "NAME": format!("{role_name}_{index}_(service_{id})"),
                    "UID": uid, "GID": gid,
                    "USER_TEMPLATE": outputs,
                    "TEMPLATE": {"NIC": {"IP": format!("10.0.0.{vm_id}"), "NETWORK": "public", "NIC_ID": "0"}}
                });
                let vm_id = self.store(EntityKind::Vm).insert(vm);
                let doc = self.doc(EntityKind::Vm, vm_id).cloned().unwrap_or(Value::Null);
                nodes.push(json!({"deploy_id": vm_id, "vm_info": {"VM": doc}}));
            }
            role["nodes"] = Value::Array(nodes);
            role["state"] = json!(ROLE_RUNNING);
        }

        if let Some(doc) = self.doc_mut(EntityKind::Service, id) {
            doc["TEMPLATE"]["BODY"]["roles"] = Value::Array(roles);
            doc["TEMPLATE"]["BODY"]["state"] =
                json!(if failed { ROLE_FAILED_DEPLOYING } else { ROLE_RUNNING });
        }
    }

    fn chgrp(&mut self, user: &str, group: &str) -> CommandOutput {
        let Some(uid) = self.find(EntityKind::User, user) else {
            return not_found(EntityKind::User, user);
        };
        let Some(gid) = self.find(EntityKind::Group, group) else {
            return not_found(EntityKind::Group, group);
        };
        if let Some(doc) = self.doc_mut(EntityKind::User, uid) {
            doc["GID"] = json!(gid.to_string());
        }
        CommandOutput::success("")
    }

    fn update_user(&mut self, user: &str, path: &str) -> CommandOutput {
        let Some(uid) = self.find(EntityKind::User, user) else {
            return not_found(EntityKind::User, user);
        };
        let Ok(body) = std::fs::read_to_string(path) else {
            return CommandOutput::failure(255, format!("Cannot read {path}"));
        };
        let attrs = parse_template(&body);
        if let Some(doc) = self.doc_mut(EntityKind::User, uid) {
            for (key, value) in attrs {
                doc["TEMPLATE"][key] = json!(value);
            }
        }
        CommandOutput::success("")
    }

    fn add_admin(&mut self, group: &str, user: &str) -> CommandOutput {
        let Some(gid) = self.find(EntityKind::Group, group) else {
            return not_found(EntityKind::Group, group);
        };
        let Some(uid) = self.find(EntityKind::User, user) else {
            return not_found(EntityKind::User, user);
        };
        if let Some(doc) = self.doc_mut(EntityKind::Group, gid) {
            let mut admins: Vec<Value> = match &doc["ADMINS"]["ID"] {
                Value::Array(ids) => ids.clone(),
                Value::Null => Vec::new(),
                single => vec![single.clone()],
            };
            admins.push(json!(uid.to_string()));
            doc["ADMINS"] = json!({ "ID": admins });
        }
        CommandOutput::success("")
    }

    fn acl(&mut self, args: &[String]) -> CommandOutput {
        match args {
            [sub, rule] if sub == "create" => {
                if self.acl_rules.contains(rule) {
                    return CommandOutput::failure(255, "[one.acl.addrule] Rule already exists");
                }
                self.acl_rules.push(rule.clone());
                CommandOutput::success(format!("ID: {}\n", self.acl_rules.len() + 1))
            }
            _ => usage("oneacl create <rule>"),
        }
    }

    fn vault(&mut self, args: &[String]) -> CommandOutput {
        let (positional, options) = split_args(args);
        let (Some(action), Some(file), Some(password_file)) = (
            positional.first(),
            positional.get(1),
            options.get("--vault-password-file"),
        ) else {
            return usage("ansible-vault encrypt|decrypt <file> --vault-password-file <file>");
        };
        let Ok(password) = std::fs::read_to_string(password_file) else {
            return CommandOutput::failure(1, "ERROR! The vault password file was not found");
        };
        let Ok(content) = std::fs::read_to_string(file) else {
            return CommandOutput::failure(1, format!("ERROR! {file} not found"));
        };
        let encrypted = content.starts_with(VAULT_HEADER);

        let output = match action.as_str() {
            "encrypt" if encrypted => return CommandOutput::failure(1, "ERROR! input is already encrypted"),
            "encrypt" => {
                let encoded: String = content.bytes().map(|b| format!("{b:02x}")).collect();
                format!("{VAULT_HEADER}\n{encoded}\n")
            }
            "decrypt" if !encrypted => return CommandOutput::failure(1, "ERROR! input is not vault encrypted data"),
            "decrypt" => {
                let hex = content.lines().skip(1).collect::<String>();
                let bytes: Option<Vec<u8>> = (0..hex.len())
                    .step_by(2)
                    .map(|i| hex.get(i..i + 2).and_then(|b| u8::from_str_radix(b, 16).ok()))
                    .collect();
                match bytes.and_then(|b| String::from_utf8(b).ok()) {
                    Some(plain) => plain,
                    None => return CommandOutput::failure(1, "ERROR! Decryption failed"),
                }
            }
            other => return CommandOutput::failure(2, format!("ansible-vault: unknown action {other}")),
        };
        if std::fs::write(file, output).is_err() {
            return CommandOutput::failure(1, format!("ERROR! cannot write {file}"));
        }
        self.vault_passwords.push(password.trim().to_string());
        CommandOutput::success(if action == "encrypt" {
            "Encryption successful\n"
        } else {
            "Decryption successful\n"
        })
    }

    fn restart(&mut self) -> CommandOutput {
        self.restarts += 1;
        let pending = std::mem::take(&mut self.pending_apps);
        for (marketplace, app) in pending {
            if self.find(EntityKind::Marketplace, &marketplace).is_some() {
                self.publish(&marketplace, app);
            } else {
                self.pending_apps.push((marketplace, app));
            }
        }
        CommandOutput::success("")
    }

    fn publish(&mut self, marketplace: &str, app: CatalogApp) -> u64 {
        let market_id = self.find(EntityKind::Marketplace, marketplace).unwrap_or_default();
        let id = self.store(EntityKind::Appliance).insert(json!({
            "NAME": app.name,
            "TYPE": app.type_code().to_string(),
            "MARKETPLACE": marketplace,
            "MARKETPLACE_ID": market_id.to_string(),
            "STATE": "1"
        }));
        self.apps.insert(id, app);
        if let Some(doc) = self.doc_mut(EntityKind::Marketplace, market_id) {
            let mut ids: Vec<Value> = match &doc["MARKETPLACEAPPS"]["ID"] {
                Value::Array(ids) => ids.clone(),
                Value::Null => Vec::new(),
                single => vec![single.clone()],
            };
            ids.push(json!(id.to_string()));
            doc["MARKETPLACEAPPS"] = json!({ "ID": ids });
        }
        id
    }
}

/// Simulated front-end; see the module documentation.
#[derive(Debug)]
pub struct FakeOne {
    state: Mutex<State>,
}

impl Default for FakeOne {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeOne {
    /// Front-end with the `oneadmin` user and group, the `users` group, the
    /// `system` and `default` datastores and the public marketplace.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::seeded()),
        }
    }

    /// Number of `show` polls before an image or service settles.
    #[must_use]
    pub fn with_polls_until_ready(self, polls: u32) -> Self {
        self.lock().polls_until_ready = polls;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish an appliance. It is visible right away when the marketplace
    /// exists, otherwise after the marketplace is created and the front-end
    /// restarted.
    pub fn add_catalog_app(&self, marketplace: &str, app: CatalogApp) {
        let mut state = self.lock();
        if state.find(EntityKind::Marketplace, marketplace).is_some() {
            state.publish(marketplace, app);
        } else {
            state.pending_apps.push((marketplace.to_string(), app));
        }
    }

    pub fn add_marketplace(&self, name: &str) -> u64 {
        self.lock().store(EntityKind::Marketplace).insert(json!({
            "NAME": name, "TEMPLATE": {"MARKET_MAD": "one"}, "MARKETPLACEAPPS": {}
        }))
    }

    pub fn add_vnet(&self, name: &str) -> u64 {
        self.lock()
            .store(EntityKind::VirtualNetwork)
            .insert(json!({"NAME": name, "UID": "0", "GID": "0"}))
    }

    /// Add an image in a fixed state.
    pub fn add_image(&self, name: &str, state_code: u8) -> u64 {
        self.lock().store(EntityKind::Image).insert(json!({
            "NAME": name, "UID": "0", "GID": "0", "STATE": state_code.to_string()
        }))
    }

    pub fn add_user(&self, name: &str, gid: u64) -> u64 {
        self.lock().store(EntityKind::User).insert(json!({
            "NAME": name, "GID": gid.to_string(), "TEMPLATE": {}
        }))
    }

    pub fn fail_export(&self, app: &str) {
        self.lock().failing_exports.insert(app.to_string());
    }

    /// Images exported from `app` end in `ERROR`.
    pub fn fail_images_of(&self, app: &str) {
        self.lock().failing_image_apps.insert(app.to_string());
    }

    pub fn fail_chown(&self, kind: EntityKind, id: u64) {
        self.lock().failing_chowns.insert((kind, id));
    }

    pub fn fail_role(&self, role: &str) {
        self.lock().failing_roles.insert(role.to_string());
    }

    /// Value the guest of every VM of `role` publishes in its user template.
    pub fn set_role_output(&self, role: &str, key: &str, value: &str) {
        self.lock()
            .role_outputs
            .entry(role.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub fn set_backend_down(&self, down: bool) {
        self.lock().backend_down = down;
    }

    /// Every command line received, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Command lines starting with `prefix`.
    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn restarts(&self) -> u32 {
        self.lock().restarts
    }

    pub fn acl_rules(&self) -> Vec<String> {
        self.lock().acl_rules.clone()
    }

    /// Extra templates received by `oneflow-template instantiate`.
    pub fn instantiate_payloads(&self) -> Vec<Value> {
        self.lock().payloads.clone()
    }

    /// Vault passwords used by `ansible-vault encrypt`.
    pub fn vault_passwords(&self) -> Vec<String> {
        self.lock().vault_passwords.clone()
    }

    pub fn id_of(&self, kind: EntityKind, name: &str) -> Option<u64> {
        self.lock().find(kind, name)
    }

    pub fn names(&self, kind: EntityKind) -> Vec<String> {
        self.lock()
            .stores
            .get(&kind)
            .map(|s| {
                s.docs
                    .values()
                    .filter_map(|d| d["NAME"].as_str().map(ToString::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.lock().stores.get(&kind).map_or(0, |s| s.docs.len())
    }

    pub fn document(&self, kind: EntityKind, id: u64) -> Option<Value> {
        self.lock().doc(kind, id).cloned()
    }

    /// `(uid, gid)` of an entity.
    pub fn owner_of(&self, kind: EntityKind, id: u64) -> Option<(u64, u64)> {
        let state = self.lock();
        let doc = state.doc(kind, id)?;
        let uid = doc["UID"].as_str()?.parse().ok()?;
        let gid = doc["GID"].as_str()?.parse().ok()?;
        Some((uid, gid))
    }

    /// Raw image state code.
    pub fn image_state(&self, id: u64) -> Option<u8> {
        self.lock()
            .doc(EntityKind::Image, id)?["STATE"]
            .as_str()?
            .parse()
            .ok()
    }
}

#[async_trait]
impl CommandExecutor for FakeOne {
    async fn execute(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        Ok(self.lock().handle(program, args))
    }
}

fn kind_for(program: &str) -> Option<EntityKind> {
    Some(match program {
        "oneuser" => EntityKind::User,
        "onegroup" => EntityKind::Group,
        "onedatastore" => EntityKind::Datastore,
        "onevnet" => EntityKind::VirtualNetwork,
        "oneimage" => EntityKind::Image,
        "onetemplate" => EntityKind::Template,
        "oneflow-template" => EntityKind::ServiceTemplate,
        "oneflow" => EntityKind::Service,
        "onemarket" => EntityKind::Marketplace,
        "onemarketapp" => EntityKind::Appliance,
        "onevm" => EntityKind::Vm,
        _ => return None,
    })
}

fn tool_name(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::ServiceTemplate | EntityKind::Service => "document",
        EntityKind::Template => "template",
        EntityKind::Appliance => "marketapp",
        EntityKind::VirtualNetwork => "vn",
        other => other.command().trim_start_matches("one"),
    }
}

fn not_found(kind: EntityKind, target: &str) -> CommandOutput {
    CommandOutput::failure(
        255,
        format!(
            "[one.{}.info] Error getting {} [{target}].",
            tool_name(kind),
            kind.name()
        ),
    )
}

fn usage(expected: &str) -> CommandOutput {
    CommandOutput::failure(255, format!("Usage: {expected}"))
}

fn render(program: &str, args: &[String]) -> String {
    std::iter::once(program.to_string())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ")
}

const VALUED_OPTIONS: &[&str] = &["--datastore", "--vault-password-file"];

fn split_args(args: &[String]) -> (Vec<String>, HashMap<String, String>) {
    let mut positional = Vec::new();
    let mut options = HashMap::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if VALUED_OPTIONS.contains(&arg.as_str()) {
            if let Some(value) = iter.next() {
                options.insert(arg.clone(), value.clone());
            }
        } else if arg.starts_with("--") {
            options.insert(arg.clone(), String::new());
        } else {
            positional.push(arg.clone());
        }
    }
    (positional, options)
}

/// Parse `KEY = "value"` pairs with backslash escapes.
fn parse_template(body: &str) -> BTreeMap<String, String> {
    let mut attrs = BTreeMap::new();
    let mut chars = body.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            key.push(c);
            chars.next();
        }
        if key.is_empty() {
            break;
        }
        while chars.peek().is_some_and(|c| c.is_whitespace() || *c == '=') {
            chars.next();
        }
        if chars.next() != Some('"') {
            break;
        }
        let mut value = String::new();
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        value.push(escaped);
                    }
                }
                '"' => break,
                _ => value.push(c),
            }
        }
        attrs.insert(key, value);
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(fake: &FakeOne, line: &str) -> CommandOutput {
        let mut parts = line.split(' ').map(ToString::to_string);
        let program = parts.next().unwrap();
        let args: Vec<String> = parts.collect();
        fake.lock().handle(&program, &args)
    }

    #[test]
    fn test_parse_template() {
        let attrs = parse_template("NAME = \"6G\"\nDESCRIPTION = \"a \\\"q\\\"\"\nKEY=\"x\ny\"\n");
        assert_eq!(attrs["NAME"], "6G");
        assert_eq!(attrs["DESCRIPTION"], "a \"q\"");
        assert_eq!(attrs["KEY"], "x\ny");
    }

    #[test]
    fn test_image_becomes_ready_after_polls() {
        let fake = FakeOne::new().with_polls_until_ready(2);
        fake.add_catalog_app("OpenNebula Public", CatalogApp::image("Ubuntu"));
        let out = run(&fake, "onemarketapp export 0 Ubuntu --datastore 1");
        assert_eq!(out.stdout, "IMAGE\n    ID: 0\nVMTEMPLATE\n    ID: 0\n");

        assert_eq!(fake.image_state(0), Some(4));
        run(&fake, "oneimage show 0 --json");
        assert_eq!(fake.image_state(0), Some(4));
        run(&fake, "oneimage show 0 --json");
        assert_eq!(fake.image_state(0), Some(1));
    }

    #[test]
    fn test_unknown_entity_is_not_found() {
        let fake = FakeOne::new();
        let out = run(&fake, "oneimage show 9 --json");
        assert_eq!(out.code, 255);
        assert!(out.stderr.contains("Error getting image [9]"));
    }

    #[test]
    fn test_apps_visible_after_restart() {
        let fake = FakeOne::new();
        fake.add_catalog_app("6G-SANDBOX", CatalogApp::image("TNLCM"));
        assert_eq!(fake.count(EntityKind::Appliance), 0);
        fake.add_marketplace("6G-SANDBOX");
        run(&fake, "systemctl restart opennebula");
        assert_eq!(fake.names(EntityKind::Appliance), vec!["TNLCM".to_string()]);
        assert_eq!(fake.restarts(), 1);
    }
}
