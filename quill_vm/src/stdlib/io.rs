//! The `io` native module: stream creation, writes and line reads.
//!
//! Blocking forms (`print`, `write`, `readline`) complete on the calling
//! worker's tick. The non-blocking read (`readline_nb`) expects a stream
//! in non-blocking mode and answers `Wait` when no complete line is
//! buffered, parking the calling frame on the worker's multiplexer until
//! the descriptor is readable; the call then retries.
//!
//! End of stream is reported as void, not a failure. I/O errors fail with
//! `#io_error`.

use parking_lot::Mutex;
use quill_bytecode::{Module, ModuleBuilder};
use quill_core::{
    Failure, FnContext, IoInterest, IoRequest, NativeCtx, NativeOutcome, Stream, TryRead, Value,
    VmError,
};
use std::sync::Arc;

fn io_fail(function: &str, detail: &str) -> NativeOutcome {
    NativeOutcome::Fail(Failure::from_host("io_error", "io", function).with_debug(detail))
}

fn stream_arg(ctx: &NativeCtx<'_>, function: &str) -> Result<Arc<Mutex<Stream>>, NativeOutcome> {
    match ctx.args.first() {
        Some(Value::Stream(s)) => Ok(Arc::clone(s)),
        other => Err(NativeOutcome::Fail(
            Failure::from_host("type_mismatch", "io", function).with_debug(&format!(
                "expected stream, found {}",
                other.map(|v| v.tag().name()).unwrap_or("nothing")
            )),
        )),
    }
}

/// Build the `io` module.
pub fn io_module() -> Result<Arc<Module>, VmError> {
    let mut b = ModuleBuilder::new("io");

    // Workers share one stdout stream so interleaved prints stay whole.
    let stdout = Arc::new(Mutex::new(Stream::stdout()?));

    let out = Arc::clone(&stdout);
    b.add_native(
        "print",
        FnContext::Traditional,
        1,
        Arc::new(move |ctx: &mut NativeCtx<'_>| {
            let text = ctx.args[0].to_string();
            match out.lock().write_all(text.as_bytes()) {
                Ok(()) => NativeOutcome::Return(Value::Void),
                Err(e) => io_fail("print", &e.to_string()),
            }
        }),
    );

    b.add_native(
        "stdin",
        FnContext::Traditional,
        0,
        Arc::new(|_ctx: &mut NativeCtx<'_>| match Stream::stdin() {
            Ok(s) => NativeOutcome::Return(Value::Stream(Arc::new(Mutex::new(s)))),
            Err(e) => io_fail("stdin", &e.to_string()),
        }),
    );

    b.add_native(
        "stdin_nb",
        FnContext::Traditional,
        0,
        Arc::new(|_ctx: &mut NativeCtx<'_>| {
            let stream = match Stream::stdin() {
                Ok(s) => s,
                Err(e) => return io_fail("stdin_nb", &e.to_string()),
            };
            if let Err(e) = stream.set_nonblocking(true) {
                return io_fail("stdin_nb", &e.to_string());
            }
            NativeOutcome::Return(Value::Stream(Arc::new(Mutex::new(stream))))
        }),
    );

    b.add_native(
        "stdout",
        FnContext::Traditional,
        0,
        Arc::new(|_ctx: &mut NativeCtx<'_>| match Stream::stdout() {
            Ok(s) => NativeOutcome::Return(Value::Stream(Arc::new(Mutex::new(s)))),
            Err(e) => io_fail("stdout", &e.to_string()),
        }),
    );

    b.add_native(
        "write",
        FnContext::Traditional,
        2,
        Arc::new(|ctx: &mut NativeCtx<'_>| {
            let stream = match stream_arg(ctx, "write") {
                Ok(s) => s,
                Err(fail) => return fail,
            };
            let text = ctx.args[1].to_string();
            let result = stream.lock().write_all(text.as_bytes());
            match result {
                Ok(()) => NativeOutcome::Return(Value::Void),
                Err(e) => io_fail("write", &e.to_string()),
            }
        }),
    );

    b.add_native(
        "readline",
        FnContext::Traditional,
        1,
        Arc::new(|ctx: &mut NativeCtx<'_>| {
            let stream = match stream_arg(ctx, "readline") {
                Ok(s) => s,
                Err(fail) => return fail,
            };
            let result = stream.lock().read_line_blocking();
            match result {
                Ok(Some(line)) => NativeOutcome::Return(Value::Str(line)),
                Ok(None) => NativeOutcome::Return(Value::Void),
                Err(e) => io_fail("readline", &e.to_string()),
            }
        }),
    );

    b.add_native(
        "readline_nb",
        FnContext::Traditional,
        1,
        Arc::new(|ctx: &mut NativeCtx<'_>| {
            let stream = match stream_arg(ctx, "readline_nb") {
                Ok(s) => s,
                Err(fail) => return fail,
            };
            let mut guard = stream.lock();
            match guard.try_read_line() {
                Ok(TryRead::Line(line)) => NativeOutcome::Return(Value::Str(line)),
                Ok(TryRead::Eof) => NativeOutcome::Return(Value::Void),
                Ok(TryRead::WouldBlock) => NativeOutcome::Wait(IoRequest {
                    fd: guard.fd(),
                    interest: IoInterest::Readable,
                }),
                Err(e) => io_fail("readline_nb", &e.to_string()),
            }
        }),
    );

    b.build().map_err(|e| {
        VmError::Load(quill_core::LoadError::Corrupt {
            module: "io".to_string(),
            detail: e.to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, Write};

    fn native_call(module: &Arc<Module>, name: &str, args: &mut [Value]) -> NativeOutcome {
        let proto = module.lookup_native(name).expect("native registered");
        let mut ctx = NativeCtx { args, pid: 1 };
        (proto.run)(&mut ctx)
    }

    fn temp_stream(contents: &str) -> Value {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.rewind().unwrap();
        Value::Stream(Arc::new(Mutex::new(Stream::from_file(file))))
    }

    #[test]
    fn test_readline_returns_lines_then_void() {
        let io = io_module().unwrap();
        let mut args = [temp_stream("one\ntwo\n")];

        match native_call(&io, "readline", &mut args) {
            NativeOutcome::Return(v) => assert_eq!(v.as_str(), Some("one")),
            _ => panic!("expected a line"),
        }
        match native_call(&io, "readline", &mut args) {
            NativeOutcome::Return(v) => assert_eq!(v.as_str(), Some("two")),
            _ => panic!("expected a line"),
        }
        match native_call(&io, "readline", &mut args) {
            NativeOutcome::Return(v) => assert!(v.is_void(), "eof reads as void"),
            _ => panic!("expected void at eof"),
        }
    }

    #[test]
    fn test_readline_rejects_non_stream() {
        let io = io_module().unwrap();
        let mut args = [Value::Int(3)];
        match native_call(&io, "readline", &mut args) {
            NativeOutcome::Fail(f) => assert_eq!(f.tag.as_ref(), "type_mismatch"),
            _ => panic!("expected a failure"),
        }
    }

    #[test]
    fn test_write_appends_printable_form() {
        let io = io_module().unwrap();
        let mut file = tempfile::tempfile().unwrap();
        let stream = Value::Stream(Arc::new(Mutex::new(Stream::from_file(
            file.try_clone().unwrap(),
        ))));
        let mut args = [stream, Value::Int(42)];
        match native_call(&io, "write", &mut args) {
            NativeOutcome::Return(v) => assert!(v.is_void()),
            _ => panic!("expected void"),
        }

        file.rewind().unwrap();
        let mut contents = String::new();
        std::io::Read::read_to_string(&mut file, &mut contents).unwrap();
        assert_eq!(contents, "42");
    }
}
