use anyhow::{Context as _, Result, anyhow};
use aya_build::{Package, Toolchain};

const EBPF_PACKAGE: &str = "ebaf-ebpf";

/// Builds the classifier for the BPF target. The object lands in `OUT_DIR`
/// under its binary name, `ebaf`, where the loader embeds it from.
fn main() -> Result<()> {
    println!("cargo:rerun-if-changed=lists");

    let cargo_metadata::Metadata { packages, .. } = cargo_metadata::MetadataCommand::new()
        .no_deps()
        .exec()
        .context("MetadataCommand::exec")?;
    let ebpf_package = packages
        .into_iter()
        .find(|cargo_metadata::Package { name, .. }| name.as_str() == EBPF_PACKAGE)
        .ok_or_else(|| anyhow!("{EBPF_PACKAGE} package not found"))?;
    let cargo_metadata::Package {
        name,
        manifest_path,
        ..
    } = ebpf_package;
    let root_dir = manifest_path
        .parent()
        .ok_or_else(|| anyhow!("no parent for {manifest_path}"))?;
    let ebpf_package = Package {
        name: name.as_str(),
        root_dir: root_dir.as_str(),
        ..Default::default()
    };
    aya_build::build_ebpf([ebpf_package], Toolchain::default())
        .with_context(|| format!("failed to build {EBPF_PACKAGE}"))
}
