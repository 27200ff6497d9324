//! Bundled demo programs, assembled directly with [`CodeBuilder`].
//!
//! Each demo is a single `demo` module whose `main` runs as the main
//! process; the `io` native module is linked in by the launcher.

use quill_bytecode::{BuildError, CodeBuilder, Module, ModuleBuilder};
use quill_core::register::{cint, creg, reg, reg2, CONST_NEWLINE, CONST_VOID};
use quill_core::{FnContext, REG_PID, REG_RESULT};
use std::sync::Arc;

/// Demo names and one-line descriptions, in listing order.
pub const DEMOS: &[(&str, &str)] = &[
    ("hello", "print a greeting"),
    ("countdown", "count from 10 down to 0"),
    ("pingpong", "spawn a process, send it a number, print the reply"),
    ("unwind", "let a failure escape the main process"),
];

pub fn is_known(name: &str) -> bool {
    DEMOS.iter().any(|(n, _)| *n == name)
}

/// Build the named demo's modules, or `None` for an unknown name.
pub fn build(name: &str) -> Option<Result<Vec<Arc<Module>>, BuildError>> {
    match name {
        "hello" => Some(hello()),
        "countdown" => Some(countdown()),
        "pingpong" => Some(pingpong()),
        "unwind" => Some(unwind()),
        _ => None,
    }
}

fn hello() -> Result<Vec<Arc<Module>>, BuildError> {
    let mut b = ModuleBuilder::new("demo");
    let ms_print = b.intern_modsym("io", "print");
    let s_text = b.intern_string("hello from quill\n");

    let mut c = CodeBuilder::new();
    c.lfunc(reg(0), ms_print);
    c.const_s(reg(1), s_text);
    c.copy(reg2(0, 0), reg(1));
    c.call(REG_RESULT, reg(0));
    c.ret(creg(CONST_VOID));
    b.add_function("main", FnContext::Traditional, 0, 2, c.finish()?);

    Ok(vec![b.build()?])
}

fn countdown() -> Result<Vec<Arc<Module>>, BuildError> {
    let mut b = ModuleBuilder::new("demo");
    let ms_print = b.intern_modsym("io", "print");

    let mut c = CodeBuilder::new();
    let top = c.new_label();
    let end = c.new_label();
    c.const_i(reg(0), 10);
    c.bind(top)?;
    c.lfunc(reg(1), ms_print);
    c.copy(reg2(1, 0), reg(0));
    c.call(REG_RESULT, reg(1));
    c.lfunc(reg(1), ms_print);
    c.copy(reg2(1, 0), creg(CONST_NEWLINE));
    c.call(REG_RESULT, reg(1));
    c.isub(reg(0), reg(0), cint(1));
    c.brlt(end, reg(0), cint(0));
    c.goto(top);
    c.bind(end)?;
    c.ret(creg(CONST_VOID));
    b.add_function("main", FnContext::Traditional, 0, 2, c.finish()?);

    Ok(vec![b.build()?])
}

fn pingpong() -> Result<Vec<Arc<Module>>, BuildError> {
    let mut b = ModuleBuilder::new("demo");
    let ms_print = b.intern_modsym("io", "print");
    let ms_incr = b.intern_modsym("demo", "incr");

    // incr: receive (sender, n), reply n + 1
    let mut c = CodeBuilder::new();
    c.recv(reg(0));
    c.copy(reg(1), reg2(0, 0));
    c.copy(reg(2), reg2(0, 1));
    c.addi(reg(2), reg(2), cint(1));
    c.send(reg(1), reg(2));
    c.ret(creg(CONST_VOID));
    b.add_function("incr", FnContext::Traditional, 0, 3, c.finish()?);

    // main: spawn incr, send (self, 9), print the reply
    let mut c = CodeBuilder::new();
    c.lfunc(reg(0), ms_incr);
    c.newproc(reg(1), reg(0));
    c.ctuple(reg(2), 2);
    c.stuple(reg(2), 0, REG_PID);
    c.stuple(reg(2), 1, cint(9));
    c.send(reg(1), reg(2));
    c.recv(reg(3));
    c.lfunc(reg(0), ms_print);
    c.copy(reg2(0, 0), reg(3));
    c.call(REG_RESULT, reg(0));
    c.lfunc(reg(0), ms_print);
    c.copy(reg2(0, 0), creg(CONST_NEWLINE));
    c.call(REG_RESULT, reg(0));
    c.ret(creg(CONST_VOID));
    b.add_function("main", FnContext::Traditional, 0, 4, c.finish()?);

    Ok(vec![b.build()?])
}

fn unwind() -> Result<Vec<Arc<Module>>, BuildError> {
    let mut b = ModuleBuilder::new("demo");
    let ms_boom = b.intern_modsym("demo", "boom");
    let s_tag = b.intern_string("demo_failure");

    let mut c = CodeBuilder::new();
    c.cfailure(reg(0), s_tag);
    c.ret(reg(0));
    b.add_function("boom", FnContext::Traditional, 0, 1, c.finish()?);

    // main never captures, so the failure reaches the process root
    let mut c = CodeBuilder::new();
    c.lfunc(reg(0), ms_boom);
    c.call(reg(1), reg(0));
    c.ret(creg(CONST_VOID));
    b.add_function("main", FnContext::Traditional, 0, 2, c.finish()?);

    Ok(vec![b.build()?])
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_bytecode::instruction_offsets;

    #[test]
    fn test_every_listed_demo_builds() {
        for (name, _) in DEMOS {
            let modules = build(name).expect("listed").expect("builds");
            let demo = modules
                .iter()
                .find(|m| &**m.name() == "demo")
                .expect("demo module present");
            let main = demo.lookup_function("main").expect("main present");
            // every body decodes into whole instructions
            instruction_offsets(&main.code).expect("well-formed code");
        }
    }

    #[test]
    fn test_unknown_demo_is_none() {
        assert!(build("nope").is_none());
    }

    #[test]
    fn test_demos_reference_io_only() {
        for (name, _) in DEMOS {
            let modules = build(name).unwrap().unwrap();
            for m in &modules {
                for import in m.imports() {
                    assert_eq!(&**import, "io", "{} imports {}", name, import);
                }
            }
        }
    }
}
