//! Tarball overlays: download with `curl`, unpack with `tar`.
//!
//! The archive is unpacked into a scratch directory beside the target and the
//! selected tree (the whole archive or its `subpath`) is then renamed into
//! place, so a failed download or extraction leaves any existing working copy
//! untouched.

use std::fs;
use std::path::Path;

use super::runner::CommandSpec;
use super::{Backend, Invocation, command_for, prepare_parent, remove_tree};
use crate::common::paths::ensure_dir;
use crate::overlay::config::BackendOptions;
use crate::overlay::error::BackendError;
use crate::overlay::types::{Overlay, SourceType};

const DOWNLOADER: &str = "curl";

pub struct Tar;

impl Tar {
    fn install(&self, inv: &Invocation, overlay: &Overlay, url: &str, target: &Path, opts: &[String]) -> Result<(), BackendError> {
        let cache = &inv.config.cache;
        ensure_dir(cache).map_err(|e| BackendError::filesystem(cache, format!("{e:#}")))?;
        prepare_parent(target)?;
        let parent = target.parent().unwrap_or(Path::new("."));

        let archive = tempfile::Builder::new()
            .prefix(&format!("{}-", overlay.name))
            .suffix(".archive")
            .tempfile_in(cache)
            .map_err(|e| BackendError::filesystem(cache, e))?;

        let mut download = CommandSpec::new(DOWNLOADER).args(["--fail", "--location", "--silent", "--show-error"]);
        if let Some(proxy) = inv.config.effective_proxy() {
            download = download.args(["--proxy", proxy.as_str()]);
        }
        download = download.arg("--output").path_arg(archive.path()).arg(url);
        inv.run(SourceType::Tar, download)?;

        let scratch = tempfile::Builder::new()
            .prefix(".overlayman-tar-")
            .tempdir_in(parent)
            .map_err(|e| BackendError::filesystem(parent, e))?;

        let extract = CommandSpec::new(command_for(inv.options(SourceType::Tar), self.default_command()))
            .arg("-x")
            .args(opts.iter().cloned())
            .arg("-f")
            .path_arg(archive.path())
            .arg("-C")
            .path_arg(scratch.path());
        inv.run(SourceType::Tar, extract)?;

        let tree = match &overlay.subpath {
            Some(sub) => scratch.path().join(sub),
            None => scratch.path().to_path_buf(),
        };
        if !tree.is_dir() {
            return Err(BackendError::filesystem(
                &tree,
                "archive does not contain the expected directory",
            ));
        }

        remove_tree(target)?;
        fs::rename(&tree, target).map_err(|e| BackendError::filesystem(target, e))?;
        Ok(())
    }
}

impl Backend for Tar {
    fn kind(&self) -> SourceType {
        SourceType::Tar
    }

    fn default_command(&self) -> &'static str {
        "tar"
    }

    fn required_tools(&self, options: &BackendOptions) -> Vec<String> {
        vec![command_for(options, self.default_command()), DOWNLOADER.to_string()]
    }

    fn add(&self, inv: &Invocation, overlay: &Overlay, url: &str, target: &Path) -> Result<(), BackendError> {
        self.install(inv, overlay, url, target, &inv.options(SourceType::Tar).addopts)
    }

    /// Archives have no incremental update; fetch and unpack again.
    fn sync(&self, inv: &Invocation, overlay: &Overlay, url: &str, target: &Path) -> Result<(), BackendError> {
        self.install(inv, overlay, url, target, &inv.options(SourceType::Tar).syncopts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::backend::runner::testing::RecordingRunner;
    use crate::overlay::config::Config;
    use tempfile::tempdir;

    #[test]
    fn downloads_then_extracts() {
        let dir = tempdir().unwrap();
        let mut config = Config::with_storage(dir.path());
        config.proxy = Some("http://proxy:3128".into());
        let runner = RecordingRunner::default();
        let inv = Invocation::new(&runner, &config);
        let target = dir.path().join("tarball");

        // the recording runner extracts nothing, so the tree is empty but present
        Tar.add(&inv, &Overlay::new("tarball", Vec::new()), "https://example.org/t.tar.gz", &target)
            .unwrap();

        let lines = runner.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("curl --fail --location --silent --show-error --proxy http://proxy:3128 --output "));
        assert!(lines[0].ends_with(" https://example.org/t.tar.gz"));
        assert!(lines[1].starts_with("tar -x -f "));
        assert!(target.is_dir());
    }

    #[test]
    fn missing_subpath_fails_without_touching_target() {
        let dir = tempdir().unwrap();
        let config = Config::with_storage(dir.path());
        let runner = RecordingRunner::default();
        let inv = Invocation::new(&runner, &config);
        let target = dir.path().join("tarball");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("keep"), "x").unwrap();

        let mut overlay = Overlay::new("tarball", Vec::new());
        overlay.subpath = Some("overlay-1.0".into());
        let err = Tar.sync(&inv, &overlay, "https://example.org/t.tar.gz", &target).unwrap_err();

        assert!(matches!(err, BackendError::Filesystem { .. }));
        assert!(target.join("keep").exists());
    }

    #[test]
    fn failed_download_skips_extraction() {
        let dir = tempdir().unwrap();
        let config = Config::with_storage(dir.path());
        let runner = RecordingRunner::default().fail_when("curl", 22);
        let inv = Invocation::new(&runner, &config);

        let err = Tar
            .add(&inv, &Overlay::new("t", Vec::new()), "https://example.org/t.tgz", &dir.path().join("t"))
            .unwrap_err();
        assert!(matches!(err, BackendError::Command { exit_code: Some(22), .. }));
        assert_eq!(runner.lines().len(), 1);
    }
}
