//! Test fixtures for common driver scenarios
//!
//! Provides a throw-away data directory laid out like an installed netcf
//! (`xml/` resources and `lenses/`), sample documents, transform tables,
//! and a [`TestBed`] wiring all mocks into a live [`Context`].

use crate::mock_engine::{MockEngine, SCHEMA_DIRECTIVE, STYLESHEET_DIRECTIVE};
use crate::mock_kernel::CannedRoutes;
use crate::mock_store::MemoryStore;
use netcf_common::{ErrorKind, NetcfError, NetcfResult, Ref};
use netcf_driver::config::{NetcfConfig, ProbeConfig};
use netcf_driver::context::{Backends, Context, InterfaceHandle};
use netcf_driver::session::TransformTable;
use netcf_driver::transform::{GET_STYLESHEET, INTERFACE_SCHEMA, PUT_STYLESHEET};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// An ethernet interface with a static IPv4 address.
pub const ETH0_XML: &str = r#"<?xml version="1.0"?>
<interface type="ethernet" name="eth0">
  <start mode="onboot"/>
  <mac address="aa:bb:cc:dd:ee:ff"/>
  <protocol family="ipv4">
    <ip address="192.168.0.5" prefix="24"/>
  </protocol>
</interface>
"#;

/// A bond in active-backup mode using DHCP.
pub const BOND0_XML: &str = r#"<?xml version="1.0"?>
<interface type="bond" name="bond0">
  <start mode="none"/>
  <protocol family="ipv4">
    <dhcp/>
  </protocol>
  <bond mode="active-backup" miimon="100"/>
</interface>
"#;

/// Store projection of an ifcfg file for eth0.
pub const ETH0_PROJECTION: &str = r#"<?xml version="1.0"?>
<forest>
  <tree path="/files/etc/sysconfig/network-scripts/ifcfg-eth0">
    <node label="DEVICE" value="eth0"/>
    <node label="ONBOOT" value="yes"/>
    <node label="BOOTPROTO" value="none"/>
    <node label="IPADDR" value="10.0.0.2"/>
    <node label="NETMASK" value="255.255.0.0"/>
  </tree>
</forest>
"#;

/// Interface description with live state stripped, as handed to
/// `add_state`.
pub const EMPTY_INTERFACE_XML: &str = "<interface/>";

/// Content of a mock resource file carrying `directive`.
fn script(directive: &str, body: &str) -> String {
    format!("# generated test resource\n{} {}\n", directive, body)
}

/// A temporary netcf data directory.
#[derive(Debug)]
pub struct DataDir {
    dir: TempDir,
}

impl DataDir {
    /// Data directory with working `get`/`put` stylesheets and an
    /// interface schema requiring `type` and `name`.
    pub fn new() -> io::Result<Self> {
        let data = Self {
            dir: tempfile::tempdir()?,
        };
        fs::create_dir_all(data.xml_dir())?;
        fs::create_dir_all(data.path().join("lenses"))?;
        data.write_stylesheet(GET_STYLESHEET, "get")?;
        data.write_stylesheet(PUT_STYLESHEET, "put")?;
        data.write_resource(INTERFACE_SCHEMA, &script(SCHEMA_DIRECTIVE, "interface type name"))?;
        Ok(data)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn xml_dir(&self) -> PathBuf {
        self.path().join("xml")
    }

    pub fn write_resource(&self, name: &str, content: &str) -> io::Result<()> {
        fs::write(self.xml_dir().join(name), content)
    }

    /// Replaces a stylesheet with the named mock script.
    pub fn write_stylesheet(&self, name: &str, script_body: &str) -> io::Result<()> {
        self.write_resource(name, &script(STYLESHEET_DIRECTIVE, script_body))
    }

    pub fn remove_resource(&self, name: &str) -> io::Result<()> {
        fs::remove_file(self.xml_dir().join(name))
    }

    /// Configuration pointing at this directory, with probes under
    /// `<dir>/proc/net/vlan` and `<dir>/sys/class/net`.
    pub fn config(&self) -> NetcfConfig {
        NetcfConfig {
            root: Some(self.path().join("root")),
            data_dir: self.path().to_path_buf(),
            debug: false,
            probe: ProbeConfig {
                proc_vlan_dir: self.path().join("proc/net/vlan"),
                sysfs_net_dir: self.path().join("sys/class/net"),
            },
        }
    }
}

/// Load-filter table for ifcfg files.
pub fn ifcfg_table() -> TransformTable {
    TransformTable::new(
        "ifcfg",
        [
            ("/augeas/load/Ifcfg/lens", "Sysconfig.lns"),
            (
                "/augeas/load/Ifcfg/incl",
                "/etc/sysconfig/network-scripts/ifcfg-*",
            ),
        ],
    )
}

/// Load-filter table for the bonding module options.
pub fn modprobe_table() -> TransformTable {
    TransformTable::new(
        "modprobe",
        [
            ("/augeas/load/Modprobe/lens", "Modprobe.lns"),
            ("/augeas/load/Modprobe/incl[1]", "/etc/modprobe.d/*"),
            ("/augeas/load/Modprobe/incl[2]", "/etc/modprobe.conf"),
        ],
    )
}

/// Table overriding the ifcfg lens set by [`ifcfg_table`].
pub fn ifcfg_override_table() -> TransformTable {
    TransformTable::new("ifcfg-override", [("/augeas/load/Ifcfg/lens", "Shellvars.lns")])
}

/// A context over in-memory collaborators, with handles on each of them.
#[derive(Debug)]
pub struct TestBed {
    pub store: MemoryStore,
    pub routes: CannedRoutes,
    pub data: DataDir,
    pub ctx: Ref<Context>,
}

impl TestBed {
    /// Fresh data directory, empty store, kernel with `lo` and `eth0`.
    pub fn new() -> NetcfResult<Self> {
        let data = DataDir::new().map_err(|e| {
            NetcfError::with_details(
                ErrorKind::FileError,
                format!("failed to create data directory: {}", e),
            )
        })?;
        Self::with_data(data, CannedRoutes::with_eth0())
    }

    pub fn with_data(data: DataDir, routes: CannedRoutes) -> NetcfResult<Self> {
        let config = data.config();
        Self::with_config(data, config, routes)
    }

    /// Like [`TestBed::with_data`] with a caller-adjusted configuration,
    /// usually `data.config()` with a field changed.
    pub fn with_config(
        data: DataDir,
        config: NetcfConfig,
        routes: CannedRoutes,
    ) -> NetcfResult<Self> {
        let store = MemoryStore::new();
        let backends = Backends::new(store.backend(), Box::new(MockEngine), routes.source());
        let ctx = Context::open(config, backends)?;
        debug!(data_dir = %data.path().display(), debug = ctx.config().debug, "test bed ready");
        Ok(Self {
            store,
            routes,
            data,
            ctx,
        })
    }

    pub fn interface(&self, name: &str) -> Ref<InterfaceHandle> {
        Context::lookup(&self.ctx, name)
    }
}
