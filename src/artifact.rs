//! Read-only stores the update artifact is fetched from

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek};
use std::path::PathBuf;

use log::trace;

/// A read-only collection of named artifacts.
pub trait ArtifactStore {
    type Handle: Read + Seek;

    /// Opens the artifact called `name`, failing with `io::ErrorKind::NotFound` when it does not
    /// exist.
    fn open(&mut self, name: &str) -> io::Result<Self::Handle>;
}

impl<A: ArtifactStore + ?Sized> ArtifactStore for &mut A {
    type Handle = A::Handle;

    fn open(&mut self, name: &str) -> io::Result<Self::Handle> {
        (**self).open(name)
    }
}

/// Artifacts stored as files in a host directory.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> DirStore {
        DirStore { root: root.into() }
    }
}

impl ArtifactStore for DirStore {
    type Handle = File;

    fn open(&mut self, name: &str) -> io::Result<File> {
        let path = self.root.join(name);
        trace!("Opening artifact {}", path.display());

        File::open(path)
    }
}

/// Artifacts held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    blobs: HashMap<String, Vec<u8>>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::default()
    }

    pub fn insert<N: Into<String>>(&mut self, name: N, data: Vec<u8>) {
        self.blobs.insert(name.into(), data);
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        self.blobs.remove(name)
    }
}

impl ArtifactStore for MemStore {
    type Handle = Cursor<Vec<u8>>;

    fn open(&mut self, name: &str) -> io::Result<Cursor<Vec<u8>>> {
        self.blobs
            .get(name)
            .map(|data| Cursor::new(data.clone()))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))
    }
}
