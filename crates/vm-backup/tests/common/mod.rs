//! # common
//!

#![allow(dead_code)]

use std::{
    fs,
    io::Read,
    path::Path,
};

use vm_backup::{
    cluster::ClusterVolumes,
    provider::{Component, FileSpec, ProviderError},
};

/// Cluster helper mapping configured path prefixes to (mount path, volume
/// name) pairs.
pub struct TestCluster {
    pub mounts: Vec<(String, String)>,
}

impl TestCluster {
    pub fn new(mounts: &[(&str, &str)]) -> Self {
        Self {
            mounts: mounts
                .iter()
                .map(|(mount, volume)| (mount.to_string(), volume.to_string()))
                .collect(),
        }
    }

    fn owning(&self, path: &str) -> Option<&(String, String)> {
        let upper = path.to_uppercase();
        self.mounts
            .iter()
            .filter(|(mount, _)| upper.starts_with(&mount.to_uppercase()))
            .max_by_key(|(mount, _)| mount.len())
    }
}

impl ClusterVolumes for TestCluster {
    fn is_supported(&self) -> bool {
        true
    }

    fn is_on_shared_volume(&self, path: &str) -> Result<bool, ProviderError> {
        Ok(self.owning(path).is_some())
    }

    fn prepare_for_backup(&self, path: &str) -> Result<(String, String), ProviderError> {
        self.owning(path)
            .cloned()
            .ok_or_else(|| ProviderError::new("prepare cluster volume", "not a shared volume"))
    }
}

pub fn file_spec(path: &str, spec: Option<&str>, recursive: bool) -> FileSpec {
    FileSpec {
        path: path.to_string(),
        spec: spec.map(str::to_string),
        recursive,
    }
}

pub fn component(name: &str, files: Vec<FileSpec>) -> Component {
    Component {
        name: name.to_string(),
        logical_path: String::new(),
        component_type: "vm".to_string(),
        caption: name.to_string(),
        files,
    }
}

/// Create every (relative path, contents) file under `root`.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (relative, contents) in files {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }
}

/// The (entry name, contents) pairs of a gzip-compressed tar, in save order.
/// Directory entries have empty contents.
pub fn read_archive(path: &Path) -> Vec<(String, String)> {
    let file = fs::File::open(path).unwrap();
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);

    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().to_string();

            let mut contents = String::new();
            entry.read_to_string(&mut contents).unwrap();

            (name.trim_end_matches('/').to_string(), contents)
        })
        .collect()
}

/// The entry names of a gzip-compressed tar, in save order.
pub fn archive_entry_names(path: &Path) -> Vec<String> {
    read_archive(path).into_iter().map(|(name, _)| name).collect()
}
