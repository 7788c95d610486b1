//! Human readable fault diagnostics.
use crate::registry::VmInstance;
use crate::{Bridge, BridgeError, VmHandle};

/// Diagnostic for the fault of `vm`, resolved to a source location when the
/// debug table covers the faulting offset.
pub(crate) fn diagnose(instance: &VmInstance) -> String {
    let script = instance.script.display();
    let machine = &instance.vm;
    let (pc, message) = match machine.fault() {
        Some(fault) => (fault.pc, fault.error.to_string()),
        None => (machine.pc(), "no error".to_owned()),
    };
    match u32::try_from(pc).ok().and_then(|pc| instance.debug.lookup(pc)) {
        Some(location) => format!(
            "{script}: execution terminated abnormally at {location}: {message}"
        ),
        None => format!(
            "{script}: execution terminated abnormally at bytecode offset {pc}: {message}"
        ),
    }
}

impl Bridge {
    pub fn explain(&self, vm: VmHandle) -> Result<String, BridgeError> {
        Ok(diagnose(self.require(vm)?))
    }

    /// Full state snapshot of `vm`, logged at debug level whenever it stops
    /// abnormally.
    pub fn dump(&self, vm: VmHandle) -> Result<String, BridgeError> {
        Ok(self.require(vm)?.vm.dump())
    }
}

#[cfg(test)]
mod tests {
    use bytecode::{BinaryOp, ProgramBuilder};

    use crate::testing::{ScriptFiles, bridge};

    /// step: line 3 is fine, line 4 divides by zero.
    fn dividing(b: &mut ProgramBuilder) {
        b.mark(1, 1);
        let step = b.define("step");
        b.code().done();
        b.code().bind(step);
        b.mark(3, 5);
        b.code().push_int(10);
        b.store_global("x");
        b.mark(4, 9);
        b.load_global("x");
        b.code().push_int(0);
        b.code().binary(BinaryOp::Div);
        b.code().ret1();
    }

    #[test]
    fn fault_resolves_to_source_location() {
        let script = ScriptFiles::build(dividing);
        let mut bridge = bridge();
        let vm = script.load(&mut bridge, 1);
        bridge.step(vm).unwrap();
        assert_eq!(
            bridge.explain(vm).unwrap(),
            format!(
                "{}: execution terminated abnormally at script.bzz:4:9: division by zero",
                script.bytecode.display()
            )
        );
    }

    #[test]
    fn fault_without_debug_info_uses_offset() {
        let script = ScriptFiles::build_without_debug(|b| {
            b.code().push_nil();
            b.code().neg();
            b.code().done();
        });
        let mut bridge = bridge();
        let vm = script.load(&mut bridge, 1);
        bridge.step(vm).unwrap();
        assert_eq!(
            bridge.explain(vm).unwrap(),
            format!(
                "{}: execution terminated abnormally at bytecode offset 1: \
                 type error in negation: expected number, got nil",
                script.bytecode.display()
            )
        );
    }

    #[test]
    fn dump_describes_the_faulted_frame() {
        let script = ScriptFiles::build(dividing);
        let mut bridge = bridge();
        let vm = script.load(&mut bridge, 4);
        assert!(bridge.dump(vm).unwrap().contains("state: Ready"));
        bridge.step(vm).unwrap();

        let dump = bridge.dump(vm).unwrap();
        assert!(dump.starts_with("vm 4 state: Error"), "{dump}");
        assert!(dump.contains("division by zero"), "{dump}");
        assert!(dump.contains("frames: 1"), "{dump}");
    }

    #[test]
    fn each_vm_keeps_its_own_debug_table() {
        let first = ScriptFiles::build(dividing);
        let second = ScriptFiles::build_without_debug(|b| b.code().done());
        let mut bridge = bridge();
        let vm = first.load(&mut bridge, 1);
        second.load(&mut bridge, 2);
        bridge.step(vm).unwrap();
        assert!(bridge.explain(vm).unwrap().contains("script.bzz:4:9"));
    }
}
