//! Alias and address resolution.
//!
//! Built once at startup from the instantiated devices, an ordered address
//! pool and the configured groups, then frozen behind an `Arc`.
//! - `alias -> address` for every addressed device
//! - `address -> device`
//! - `group alias -> tag`, expanded to devices in registry order

use std::collections::{BTreeMap, HashMap, HashSet};

use hdbus_core::error::{HdbusError, Result};

use crate::config::{ExhaustionPolicy, GroupConfig};
use crate::device::DeviceHandle;

/// What an alias names, with addresses already resolved.
#[derive(Debug, Clone)]
pub enum Target {
    Device { device: DeviceHandle, address: String },
    Group { alias: String, members: Vec<(DeviceHandle, String)> },
}

#[derive(Debug)]
struct Group {
    alias: String,
    tag: String,
}

#[derive(Debug)]
pub struct AddressRegistry {
    /// Registry order (config order).
    devices: Vec<DeviceHandle>,
    by_alias: HashMap<String, usize>,
    by_address: HashMap<String, usize>,
    groups: Vec<Group>,
}

impl AddressRegistry {
    /// Assign pool addresses to `devices` in order and index the result.
    pub fn build(
        devices: Vec<DeviceHandle>,
        pool: &[String],
        groups: &[GroupConfig],
        policy: ExhaustionPolicy,
    ) -> Result<Self> {
        let mut by_alias = HashMap::with_capacity(devices.len());
        for (i, d) in devices.iter().enumerate() {
            if by_alias.insert(d.alias().to_string(), i).is_some() {
                return Err(HdbusError::Config(format!(
                    "duplicate device alias {}",
                    d.alias()
                )));
            }
        }

        let mut seen = HashSet::with_capacity(pool.len());
        if let Some(dup) = pool.iter().find(|a| !seen.insert(a.as_str())) {
            return Err(HdbusError::Config(format!(
                "duplicate pool address {dup}"
            )));
        }

        let mut group_aliases = HashSet::with_capacity(groups.len());
        for g in groups {
            if by_alias.contains_key(&g.alias) {
                return Err(HdbusError::Config(format!(
                    "group alias {} collides with a device alias",
                    g.alias
                )));
            }
            if !group_aliases.insert(g.alias.as_str()) {
                return Err(HdbusError::Config(format!(
                    "duplicate group alias {}",
                    g.alias
                )));
            }
        }

        let unaddressed: Vec<String> = devices
            .iter()
            .skip(pool.len())
            .map(|d| d.alias().to_string())
            .collect();
        if !unaddressed.is_empty() {
            match policy {
                ExhaustionPolicy::Fail => {
                    return Err(HdbusError::AddressPoolExhausted(unaddressed));
                }
                ExhaustionPolicy::Warn => {
                    for alias in &unaddressed {
                        tracing::warn!(alias = %alias, "address pool exhausted; device left unaddressed");
                    }
                }
            }
        }

        let mut by_address = HashMap::with_capacity(pool.len());
        for (i, (device, address)) in devices.iter().zip(pool).enumerate() {
            device.with(|d| d.set_address(address.clone()));
            by_address.insert(address.clone(), i);
        }

        Ok(Self {
            devices,
            by_alias,
            by_address,
            groups: groups
                .iter()
                .map(|g| Group {
                    alias: g.alias.clone(),
                    tag: g.tag.clone(),
                })
                .collect(),
        })
    }

    /// Address of an individually addressable device.
    pub fn resolve(&self, alias: &str) -> Result<String> {
        let device = self
            .device(alias)
            .ok_or_else(|| HdbusError::UnknownAlias(alias.to_string()))?;
        device
            .address()
            .ok_or_else(|| HdbusError::AddressNotFound(alias.to_string()))
    }

    pub fn device(&self, alias: &str) -> Option<&DeviceHandle> {
        self.by_alias.get(alias).and_then(|&i| self.devices.get(i))
    }

    pub fn device_at(&self, address: &str) -> Option<&DeviceHandle> {
        self.by_address.get(address).and_then(|&i| self.devices.get(i))
    }

    pub fn is_group(&self, alias: &str) -> bool {
        self.groups.iter().any(|g| g.alias == alias)
    }

    /// Addressed devices carrying the group's tag, in registry order.
    ///
    /// `None` if `alias` is not a group; an empty list is a valid answer.
    pub fn resolve_group(&self, alias: &str) -> Option<Vec<DeviceHandle>> {
        self.group_members(alias)
            .map(|members| members.into_iter().map(|(device, _)| device).collect())
    }

    fn group_members(&self, alias: &str) -> Option<Vec<(DeviceHandle, String)>> {
        let group = self.groups.iter().find(|g| g.alias == alias)?;
        Some(
            self.devices
                .iter()
                .filter(|d| d.has_tag(&group.tag))
                .filter_map(|d| d.address().map(|address| (d.clone(), address)))
                .collect(),
        )
    }

    pub fn lookup(&self, alias: &str) -> Result<Target> {
        if let Some(members) = self.group_members(alias) {
            return Ok(Target::Group {
                alias: alias.to_string(),
                members,
            });
        }
        let address = self.resolve(alias)?;
        let device = self
            .device(alias)
            .cloned()
            .ok_or_else(|| HdbusError::UnknownAlias(alias.to_string()))?;
        Ok(Target::Device { device, address })
    }

    pub fn devices(&self) -> &[DeviceHandle] {
        &self.devices
    }

    /// alias -> address for every addressed device.
    pub fn address_table(&self) -> BTreeMap<String, String> {
        self.devices
            .iter()
            .filter_map(|d| d.address().map(|a| (d.alias().to_string(), a)))
            .collect()
    }

    /// group alias -> member aliases.
    pub fn group_table(&self) -> BTreeMap<String, Vec<String>> {
        self.groups
            .iter()
            .map(|g| {
                let members = self
                    .resolve_group(&g.alias)
                    .unwrap_or_default()
                    .iter()
                    .map(|d| d.alias().to_string())
                    .collect();
                (g.alias.clone(), members)
            })
            .collect()
    }

    /// Log the address tree at startup.
    pub fn log_tree(&self) {
        for d in &self.devices {
            match d.address() {
                Some(address) => tracing::info!(alias = %d.alias(), %address, tags = ?d.tags(), "device"),
                None => tracing::info!(alias = %d.alias(), tags = ?d.tags(), "device (unaddressed)"),
            }
        }
        for (alias, members) in self.group_table() {
            tracing::info!(group = %alias, ?members, "group");
        }
    }
}
