//! Core domain types.
//!
//! This module enumerates the backend entity kinds together with the command
//! line tool and JSON root element each one maps to, the appliance kinds
//! reported by marketplaces, and the numeric state codes the installer waits on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Entities managed through the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// User account
    User,
    /// User group
    Group,
    /// Storage datastore
    Datastore,
    /// Virtual network
    VirtualNetwork,
    /// Disk image
    Image,
    /// VM template
    Template,
    /// Multi-role service template
    ServiceTemplate,
    /// Instantiated service
    Service,
    /// Appliance marketplace
    Marketplace,
    /// Marketplace appliance
    Appliance,
    /// Virtual machine
    Vm,
}

impl EntityKind {
    /// Returns the kind as a human readable name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::Datastore => "datastore",
            Self::VirtualNetwork => "virtual network",
            Self::Image => "image",
            Self::Template => "template",
            Self::ServiceTemplate => "service template",
            Self::Service => "service",
            Self::Marketplace => "marketplace",
            Self::Appliance => "appliance",
            Self::Vm => "vm",
        }
    }

    /// Returns the command line tool that manages this kind.
    #[must_use]
    pub const fn command(&self) -> &'static str {
        match self {
            Self::User => "oneuser",
            Self::Group => "onegroup",
            Self::Datastore => "onedatastore",
            Self::VirtualNetwork => "onevnet",
            Self::Image => "oneimage",
            Self::Template => "onetemplate",
            Self::ServiceTemplate => "oneflow-template",
            Self::Service => "oneflow",
            Self::Marketplace => "onemarket",
            Self::Appliance => "onemarketapp",
            Self::Vm => "onevm",
        }
    }

    /// Returns the root element of a `show --json` document.
    #[must_use]
    pub const fn json_root(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Group => "GROUP",
            Self::Datastore => "DATASTORE",
            Self::VirtualNetwork => "VNET",
            Self::Image => "IMAGE",
            Self::Template => "VMTEMPLATE",
            Self::ServiceTemplate | Self::Service => "DOCUMENT",
            Self::Marketplace => "MARKETPLACE",
            Self::Appliance => "MARKETPLACEAPP",
            Self::Vm => "VM",
        }
    }

    /// Returns the root element of a `list --json` document.
    #[must_use]
    pub const fn pool_root(&self) -> &'static str {
        match self {
            Self::User => "USER_POOL",
            Self::Group => "GROUP_POOL",
            Self::Datastore => "DATASTORE_POOL",
            Self::VirtualNetwork => "VNET_POOL",
            Self::Image => "IMAGE_POOL",
            Self::Template => "VMTEMPLATE_POOL",
            Self::ServiceTemplate | Self::Service => "DOCUMENT_POOL",
            Self::Marketplace => "MARKETPLACE_POOL",
            Self::Appliance => "MARKETPLACEAPP_POOL",
            Self::Vm => "VM_POOL",
        }
    }

    /// Whether the kind's `chown` command is supported by the installer.
    #[must_use]
    pub const fn supports_chown(&self) -> bool {
        matches!(
            self,
            Self::Image | Self::Template | Self::ServiceTemplate | Self::Service | Self::Vm
        )
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace(['-', '_'], " ").as_str() {
            "user" => Ok(Self::User),
            "group" => Ok(Self::Group),
            "datastore" => Ok(Self::Datastore),
            "virtual network" | "vnet" => Ok(Self::VirtualNetwork),
            "image" => Ok(Self::Image),
            "template" => Ok(Self::Template),
            "service template" => Ok(Self::ServiceTemplate),
            "service" => Ok(Self::Service),
            "marketplace" => Ok(Self::Marketplace),
            "appliance" => Ok(Self::Appliance),
            "vm" => Ok(Self::Vm),
            _ => Err(Error::InvalidRequest(format!("Unknown entity kind: {s}"))),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What a marketplace appliance exports into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplianceKind {
    /// One image plus one template
    Image,
    /// One template referencing one or more images
    Vm,
    /// One service template referencing one or more templates
    Service,
}

impl ApplianceKind {
    /// Maps the marketplace type code onto an appliance kind.
    ///
    /// # Errors
    ///
    /// Returns an error for codes the installer does not handle.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(Self::Image),
            2 => Ok(Self::Vm),
            3 => Ok(Self::Service),
            other => Err(Error::ParseError(format!(
                "Unsupported marketplace appliance type {other}"
            ))),
        }
    }

    /// Returns the kind as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "IMAGE",
            Self::Vm => "VMTEMPLATE",
            Self::Service => "SERVICE_TEMPLATE",
        }
    }
}

impl fmt::Display for ApplianceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Image states as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageState {
    /// Being registered
    Init,
    /// Ready to be used
    Ready,
    /// Attached to at least one VM
    Used,
    /// Disabled by an administrator
    Disabled,
    /// Being copied or downloaded
    Locked,
    /// Registration failed
    Error,
    /// Being cloned
    Clone,
    /// Being deleted
    Delete,
    /// Persistent and in use
    UsedPers,
    /// Locked while in use
    LockedUsed,
    /// Locked while in persistent use
    LockedUsedPers,
}

impl ImageState {
    /// Maps a numeric state code.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown codes.
    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Self::Init,
            1 => Self::Ready,
            2 => Self::Used,
            3 => Self::Disabled,
            4 => Self::Locked,
            5 => Self::Error,
            6 => Self::Clone,
            7 => Self::Delete,
            8 => Self::UsedPers,
            9 => Self::LockedUsed,
            10 => Self::LockedUsedPers,
            other => {
                return Err(Error::ParseError(format!("Unknown image state {other}")));
            }
        })
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::Init => 0,
            Self::Ready => 1,
            Self::Used => 2,
            Self::Disabled => 3,
            Self::Locked => 4,
            Self::Error => 5,
            Self::Clone => 6,
            Self::Delete => 7,
            Self::UsedPers => 8,
            Self::LockedUsed => 9,
            Self::LockedUsedPers => 10,
        }
    }

    /// Returns the backend's name for the state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Ready => "READY",
            Self::Used => "USED",
            Self::Disabled => "DISABLED",
            Self::Locked => "LOCKED",
            Self::Error => "ERROR",
            Self::Clone => "CLONE",
            Self::Delete => "DELETE",
            Self::UsedPers => "USED_PERS",
            Self::LockedUsed => "LOCKED_USED",
            Self::LockedUsedPers => "LOCKED_USED_PERS",
        }
    }

    /// An image in one of these states can back a VM.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self, Self::Ready | Self::Used | Self::UsedPers)
    }

    /// Terminal failure states.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Error)
    }
}

impl fmt::Display for ImageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service and role states as reported by the flow service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleState {
    /// Waiting to be deployed
    Pending,
    /// VMs being created
    Deploying,
    /// All VMs running
    Running,
    /// VMs being removed
    Undeploying,
    /// A VM reported a problem
    Warning,
    /// Removed
    Done,
    /// Removal failed
    FailedUndeploying,
    /// Deployment failed
    FailedDeploying,
    /// Cardinality changing
    Scaling,
    /// Cardinality change failed
    FailedScaling,
    /// Waiting after a scaling operation
    Cooldown,
    /// Stopped or otherwise held
    Other(u8),
}

impl RoleState {
    /// Maps a numeric state code. Unknown codes are preserved.
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Pending,
            1 => Self::Deploying,
            2 => Self::Running,
            3 => Self::Undeploying,
            4 => Self::Warning,
            5 => Self::Done,
            6 => Self::FailedUndeploying,
            7 => Self::FailedDeploying,
            8 => Self::Scaling,
            9 => Self::FailedScaling,
            10 => Self::Cooldown,
            other => Self::Other(other),
        }
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Deploying => 1,
            Self::Running => 2,
            Self::Undeploying => 3,
            Self::Warning => 4,
            Self::Done => 5,
            Self::FailedUndeploying => 6,
            Self::FailedDeploying => 7,
            Self::Scaling => 8,
            Self::FailedScaling => 9,
            Self::Cooldown => 10,
            Self::Other(code) => *code,
        }
    }

    /// Whether the role is running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Terminal failure states.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(
            self,
            Self::FailedDeploying | Self::FailedUndeploying | Self::FailedScaling
        )
    }

    /// Returns the flow service's name for the state.
    #[must_use]
    pub fn as_string(&self) -> String {
        match self {
            Self::Pending => "PENDING".to_string(),
            Self::Deploying => "DEPLOYING".to_string(),
            Self::Running => "RUNNING".to_string(),
            Self::Undeploying => "UNDEPLOYING".to_string(),
            Self::Warning => "WARNING".to_string(),
            Self::Done => "DONE".to_string(),
            Self::FailedUndeploying => "FAILED_UNDEPLOYING".to_string(),
            Self::FailedDeploying => "FAILED_DEPLOYING".to_string(),
            Self::Scaling => "SCALING".to_string(),
            Self::FailedScaling => "FAILED_SCALING".to_string(),
            Self::Cooldown => "COOLDOWN".to_string(),
            Self::Other(code) => format!("STATE_{code}"),
        }
    }
}

impl fmt::Display for RoleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}
