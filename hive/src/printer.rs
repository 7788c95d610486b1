//! The `print` and `log` script built-ins.
use std::io::Write;
use std::rc::Rc;
use std::sync::Arc;

use parking_lot::Mutex;
use vm::{RuntimeError, Value, Vm};

/// Destination of script output.
#[derive(Debug, Clone, Default)]
pub enum PrintSink {
    #[default]
    Stdout,
    Buffer(Arc<Mutex<Vec<u8>>>),
}

impl PrintSink {
    pub fn buffer() -> Self {
        Self::Buffer(Arc::default())
    }

    /// Everything written to a buffer sink so far; empty for stdout.
    pub fn text(&self) -> String {
        match self {
            Self::Stdout => String::new(),
            Self::Buffer(buffer) => String::from_utf8_lossy(&buffer.lock()).into_owned(),
        }
    }

    fn write_line(&self, line: &str) {
        match self {
            Self::Stdout => {
                let mut stdout = std::io::stdout().lock();
                if let Err(err) = writeln!(stdout, "{line}") {
                    log::warn!("print failed: {err}");
                }
            }
            Self::Buffer(buffer) => {
                let mut buffer = buffer.lock();
                buffer.extend_from_slice(line.as_bytes());
                buffer.push(b'\n');
            }
        }
    }
}

/// Register `print` and `log`, both writing their arguments back to back
/// followed by a newline.
pub(crate) fn install(vm: &mut Vm, sink: PrintSink) {
    let print = vm.register_native(
        "print",
        Rc::new(move |vm: &mut Vm| -> Result<Value, RuntimeError> {
            let mut line = String::new();
            for idx in 1..vm.local_count() {
                line.push_str(&vm.describe(&vm.local(idx)?));
            }
            sink.write_line(&line);
            Ok(Value::Nil)
        }),
    );
    vm.set_global("print", print.clone());
    vm.set_global("log", print);
}
