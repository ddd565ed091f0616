// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Inode-to-path table for the FUSE adapter.
//!
//! The engine's [`vmc_fs::Filesystem`] boundary is path-based and knows
//! nothing about inode numbers; FUSE addresses everything by inode. This
//! maps the two lazily, the way most path-indexed `fuser` filesystems do:
//! inode 1 is always the root, and every other inode is assigned the first
//! time its path is looked up and kept stable until the path is removed or
//! renamed.

use std::collections::HashMap;

pub const ROOT_INO: u64 = 1;

pub fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

pub struct Inodes {
    paths: HashMap<u64, String>,
    inos: HashMap<String, u64>,
    next: u64,
}

impl Inodes {
    pub fn new() -> Self {
        let mut paths = HashMap::new();
        let mut inos = HashMap::new();
        paths.insert(ROOT_INO, "/".to_string());
        inos.insert("/".to_string(), ROOT_INO);
        Self { paths, inos, next: ROOT_INO + 1 }
    }

    /// Resolves `ino` to the path it was last interned with.
    pub fn path(&self, ino: u64) -> Option<String> {
        self.paths.get(&ino).cloned()
    }

    /// Resolves `parent`'s path and appends `name`, without allocating an
    /// inode for the result — used before the child is known to exist.
    pub fn child_path(&self, parent: u64, name: &str) -> Option<String> {
        self.path(parent).map(|p| join(&p, name))
    }

    /// Returns the inode for `path`, allocating a fresh one on first sight.
    pub fn intern(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.inos.get(path) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.paths.insert(ino, path.to_string());
        self.inos.insert(path.to_string(), ino);
        ino
    }

    /// Updates every interned path under `from` (inclusive) to sit under
    /// `to` instead, after a successful rename (§4.5 `rename`). Without
    /// this, children of a renamed directory would keep resolving to their
    /// pre-rename path and start returning `ENOENT`.
    pub fn rename(&mut self, from: &str, to: &str) {
        let affected: Vec<u64> = self
            .paths
            .iter()
            .filter(|(_, p)| p.as_str() == from || p.starts_with(&format!("{from}/")))
            .map(|(&ino, _)| ino)
            .collect();

        for ino in affected {
            let old_path = self.paths.remove(&ino).unwrap();
            self.inos.remove(&old_path);
            let new_path = if old_path == from {
                to.to_string()
            } else {
                format!("{to}{}", &old_path[from.len()..])
            };
            self.paths.insert(ino, new_path.clone());
            self.inos.insert(new_path, ino);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_preinterned() {
        let inodes = Inodes::new();
        assert_eq!(inodes.path(ROOT_INO).as_deref(), Some("/"));
    }

    #[test]
    fn intern_is_stable_and_unique() {
        let mut inodes = Inodes::new();
        let a = inodes.intern("/a");
        let b = inodes.intern("/b");
        assert_ne!(a, b);
        assert_eq!(inodes.intern("/a"), a);
    }

    #[test]
    fn child_path_joins_relative_to_root() {
        let inodes = Inodes::new();
        assert_eq!(inodes.child_path(ROOT_INO, "a").as_deref(), Some("/a"));
    }

    #[test]
    fn rename_updates_subtree_paths() {
        let mut inodes = Inodes::new();
        let dir = inodes.intern("/d");
        let child = inodes.intern("/d/x");

        inodes.rename("/d", "/e");

        assert_eq!(inodes.path(dir).as_deref(), Some("/e"));
        assert_eq!(inodes.path(child).as_deref(), Some("/e/x"));
    }
}
