//! Command-line interface definition.

use clap::Parser;

/// Run a quill program on the VM.
#[derive(Parser, Debug)]
#[command(name = "quill", version, about = "The quill virtual machine")]
pub struct QuillArgs {
    /// Demo program to run (see --list).
    pub demo: Option<String>,

    /// List the bundled demo programs and exit.
    #[arg(long)]
    pub list: bool,

    /// Number of worker threads.
    #[arg(long, default_value_t = 1)]
    pub workers: usize,

    /// Log filter directives (overrides the QUILL_LOG environment variable).
    #[arg(long)]
    pub log: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = QuillArgs::parse_from(["quill", "hello"]);
        assert_eq!(args.demo.as_deref(), Some("hello"));
        assert_eq!(args.workers, 1);
        assert!(!args.list);
        assert!(args.log.is_none());
    }

    #[test]
    fn test_worker_count_flag() {
        let args = QuillArgs::parse_from(["quill", "pingpong", "--workers", "4"]);
        assert_eq!(args.workers, 4);
    }
}
