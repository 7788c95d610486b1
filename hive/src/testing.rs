//! Helpers for tests that need scripts on disk.
use std::fs;
use std::path::{Path, PathBuf};

use bytecode::{DebugTable, ProgramBuilder};
use tempfile::TempDir;

use crate::{Bridge, BridgeCreateInfo, PrintSink, VmHandle};

/// A bytecode image and debug table written to a temporary directory.
pub(crate) struct ScriptFiles {
    dir: TempDir,
    pub bytecode: PathBuf,
    pub debug: PathBuf,
}

impl ScriptFiles {
    pub fn build(emit: impl FnOnce(&mut ProgramBuilder)) -> Self {
        let mut b = ProgramBuilder::new("script.bzz");
        emit(&mut b);
        let (program, debug) = b.finish().expect("test program should validate");
        Self::write(&program.to_bytes(), &debug.to_bytes())
    }

    /// Same as [`ScriptFiles::build`] with an empty debug table.
    pub fn build_without_debug(emit: impl FnOnce(&mut ProgramBuilder)) -> Self {
        let mut b = ProgramBuilder::new("script.bzz");
        emit(&mut b);
        let (program, _) = b.finish().expect("test program should validate");
        Self::write(&program.to_bytes(), &DebugTable::default().to_bytes())
    }

    fn write(image: &[u8], debug: &[u8]) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let bytecode = dir.path().join("script.bo");
        let debug_path = dir.path().join("script.bdb");
        fs::write(&bytecode, image).expect("write bytecode");
        fs::write(&debug_path, debug).expect("write debug table");
        Self {
            dir,
            bytecode,
            debug: debug_path,
        }
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn load(&self, bridge: &mut Bridge, context_id: u16) -> VmHandle {
        bridge
            .load(&self.bytecode, &self.debug, context_id)
            .expect("script should load")
    }
}

pub(crate) fn bridge() -> Bridge {
    Bridge::new(BridgeCreateInfo {
        output: PrintSink::buffer(),
        ..Default::default()
    })
}

/// Bridge whose `print` output can be read back from the returned sink.
pub(crate) fn capturing_bridge() -> (Bridge, PrintSink) {
    let output = PrintSink::buffer();
    let bridge = Bridge::new(BridgeCreateInfo {
        output: output.clone(),
        ..Default::default()
    });
    (bridge, output)
}
