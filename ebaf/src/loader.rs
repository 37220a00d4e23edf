use std::{
    ffi::{CStr, CString},
    fs, io,
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, bail};
use aya::{
    Ebpf, EbpfLoader, include_bytes_aligned,
    programs::{Xdp, XdpFlags, xdp::XdpLinkId},
};
use clap::ValueEnum;
use ebaf_common::{MAP_ADDRESS_TABLE, MAP_EXCEPTION_TABLE, MAP_STATS, XDP_PROGRAM};
use ebaf_control::{AddressTable, KernelAddressTable, KernelTables, StatsTable};
use serde_json::{Value, json};
use tracing::{info, warn};

const EBPF_BYTES: &[u8] = include_bytes_aligned!(concat!(env!("OUT_DIR"), "/ebaf"));

pub const DEFAULT_PIN_DIR: &str = "/sys/fs/bpf/ebaf";

const PINNED_MAPS: [&str; 3] = [MAP_ADDRESS_TABLE, MAP_EXCEPTION_TABLE, MAP_STATS];

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum XdpMode {
    /// Generic first, then native, then the kernel's default.
    Auto,
    Skb,
    Driver,
    Hw,
}

impl XdpMode {
    fn attempts(self) -> Vec<(&'static str, XdpFlags)> {
        match self {
            XdpMode::Auto => vec![
                ("skb", XdpFlags::SKB_MODE),
                ("driver", XdpFlags::DRV_MODE),
                ("default", XdpFlags::default()),
            ],
            XdpMode::Skb => vec![("skb", XdpFlags::SKB_MODE)],
            XdpMode::Driver => vec![("driver", XdpFlags::DRV_MODE)],
            XdpMode::Hw => vec![("hw", XdpFlags::HW_MODE)],
        }
    }
}

#[derive(Clone, Debug)]
pub struct AttachOptions {
    pub iface: String,
    pub xdp_mode: XdpMode,
    pub pin_dir: PathBuf,
}

/// The loaded object and its XDP link. Dropping it without calling
/// [`Firewall::detach`] leaves detaching to the kernel when the fd closes.
pub struct Firewall {
    bpf: Ebpf,
    link: Option<XdpLinkId>,
    iface: String,
    pin_dir: PathBuf,
}

/// Load the classifier, pin its maps, zero the counters and attach it to
/// `opts.iface`. The returned tables are the control plane's only access to
/// the maps.
pub fn load_and_attach(opts: &AttachOptions) -> Result<(Firewall, KernelTables)> {
    let ifindex = interface_index(&opts.iface)?;

    let mut bpf = EbpfLoader::new()
        .load(EBPF_BYTES)
        .context("failed to load eBPF object")?;

    for map_name in PINNED_MAPS {
        pin_map(&mut bpf, map_name, &opts.pin_dir.join(map_name))?;
    }

    let tables = KernelTables::take(&mut bpf).context("classifier maps unavailable")?;
    tables.stats.reset().context("failed to zero stats counters")?;

    let link = attach_xdp(&mut bpf, &opts.iface, opts.xdp_mode)?;
    info!(iface = %opts.iface, ifindex, "classifier attached");

    Ok((
        Firewall {
            bpf,
            link: Some(link),
            iface: opts.iface.clone(),
            pin_dir: opts.pin_dir.clone(),
        },
        tables,
    ))
}

impl Firewall {
    pub fn iface(&self) -> &str {
        &self.iface
    }

    /// Detach the program and remove the map pins.
    pub fn detach(mut self) -> Result<()> {
        if let Some(link) = self.link.take() {
            let program: &mut Xdp = self
                .bpf
                .program_mut(XDP_PROGRAM)
                .with_context(|| format!("program {XDP_PROGRAM} not found"))?
                .try_into()
                .context("xdp program has wrong type")?;
            program
                .detach(link)
                .context("failed to detach xdp program")?;
            info!(iface = %self.iface, "classifier detached");
        }
        for map_name in PINNED_MAPS {
            remove_pin(&self.pin_dir.join(map_name))?;
        }
        Ok(())
    }
}

fn interface_index(iface: &str) -> Result<u32> {
    let name = CString::new(iface).with_context(|| format!("invalid interface name {iface:?}"))?;
    let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if index == 0 {
        let err = io::Error::last_os_error();
        let available = interface_names();
        let available = if available.is_empty() {
            "none".to_string()
        } else {
            available.join(", ")
        };
        return Err(err)
            .with_context(|| format!("interface {iface} not found (available: {available})"));
    }
    Ok(index)
}

fn interface_names() -> Vec<String> {
    let mut names = Vec::new();
    unsafe {
        let head = libc::if_nameindex();
        if head.is_null() {
            return names;
        }
        // the array ends with a zeroed entry
        let mut entry = head;
        while (*entry).if_index != 0 {
            if !(*entry).if_name.is_null() {
                names.push(CStr::from_ptr((*entry).if_name).to_string_lossy().into_owned());
            }
            entry = entry.add(1);
        }
        libc::if_freenameindex(head);
    }
    names
}

fn pin_map(bpf: &mut Ebpf, map_name: &str, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    // a pin left by an earlier run points at that run's map
    remove_pin(path)?;
    let map = bpf
        .map_mut(map_name)
        .with_context(|| format!("map {map_name} not found"))?;
    map.pin(path)
        .map_err(|err| anyhow!("failed to pin map {map_name} at {}: {err}", path.display()))
}

fn remove_pin(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}

fn attach_xdp(bpf: &mut Ebpf, iface: &str, mode: XdpMode) -> Result<XdpLinkId> {
    let program: &mut Xdp = bpf
        .program_mut(XDP_PROGRAM)
        .with_context(|| format!("program {XDP_PROGRAM} not found"))?
        .try_into()
        .context("xdp program has wrong type")?;
    program.load().context("failed to load xdp program")?;

    let mut last_err = None;
    for (label, flags) in mode.attempts() {
        match program.attach(iface, flags) {
            Ok(link) => {
                info!(iface, mode = label, "xdp attached");
                return Ok(link);
            }
            Err(err) => {
                warn!(iface, mode = label, error = %err, "xdp attach failed");
                last_err = Some(err);
            }
        }
    }
    match last_err {
        Some(err) => Err(err).with_context(|| format!("failed to attach xdp on {iface}")),
        None => bail!("no xdp attach mode to try"),
    }
}

/// The pinned Address Table of a running agent as a JSON array of
/// `{"ip", "hits"}` objects, busiest first.
pub fn dump_address_table(pin_dir: &Path) -> Result<Value> {
    let path = pin_dir.join(MAP_ADDRESS_TABLE);
    let table = KernelAddressTable::from_pin(&path)
        .with_context(|| format!("failed to open pinned map {}", path.display()))?;
    let entries = table.entries().context("failed to read address table")?;
    Ok(entries_to_json(entries))
}

pub(crate) fn entries_to_json(mut entries: Vec<(Ipv4Addr, u64)>) -> Value {
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    Value::Array(
        entries
            .into_iter()
            .map(|(ip, hits)| json!({ "ip": ip.to_string(), "hits": hits }))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_mode_falls_back_in_order() {
        let labels: Vec<_> = XdpMode::Auto
            .attempts()
            .into_iter()
            .map(|(label, _)| label)
            .collect();
        assert_eq!(labels, vec!["skb", "driver", "default"]);
    }

    #[test]
    fn explicit_mode_has_no_fallback() {
        assert_eq!(XdpMode::Driver.attempts().len(), 1);
        assert_eq!(XdpMode::Hw.attempts()[0].0, "hw");
    }

    #[test]
    fn dump_orders_by_hits() {
        let value = entries_to_json(vec![
            (Ipv4Addr::new(10, 0, 0, 2), 1),
            (Ipv4Addr::new(10, 0, 0, 1), 7),
            (Ipv4Addr::new(10, 0, 0, 3), 1),
        ]);
        assert_eq!(
            value,
            json!([
                { "ip": "10.0.0.1", "hits": 7 },
                { "ip": "10.0.0.2", "hits": 1 },
                { "ip": "10.0.0.3", "hits": 1 },
            ])
        );
    }

    #[test]
    fn unknown_interface_is_rejected() {
        let err = interface_index("ebaf-no-such-if0").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("not found"));
        assert!(message.contains("available: "));
    }

    #[test]
    fn interface_listing_has_no_blank_names() {
        assert!(interface_names().iter().all(|name| !name.is_empty()));
    }

    #[test]
    fn removing_a_missing_pin_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        remove_pin(&dir.path().join("absent")).unwrap();
    }
}
