//! Static documentation served through the MCP resources surface, so
//! clients can discover the intended workflow without leaving the protocol.

use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
pub struct UsageResource {
    pub uri: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "mimeType")]
    pub mime_type: &'static str,
    #[serde(skip)]
    pub text: &'static str,
}

const WORKFLOW_DOC: &str = r#"# Analyzing a crash dump

1. Find a dump: call `list_dumps` with a directory to search recursively.
2. Open it: `open_dump` with the dump path (and a symbol path if you have
   one). Opening a new dump closes any previous session.
3. Queue commands with `run_command_async`. The response carries only a
   `commandId`; results are NEVER returned inline.
4. Poll `get_command_status` with that id every 5-15 seconds until `status`
   is `completed`, `failed`, or `cancelled`. The `result` field holds the
   debugger output once completed.
5. Long commands (e.g. `!analyze -v`) can run for minutes; the server keeps
   them alive under an extended deadline and emits progress heartbeats.
6. `cancel_command` aborts one command; `close_session` cancels everything
   and stops the debugger.

Command results stay pollable for a retention window after completion, and
completed results remain available from the result cache after that.
"#;

const COMMANDS_DOC: &str = r#"# Common cdb commands

- `!analyze -v`     detailed crash analysis (slow; extended deadline)
- `k`, `kb`, `kp`   current thread stack
- `~*k`             stacks for every thread (slow)
- `lm`              loaded module list (slow with remote symbols)
- `!process 0 7`    every process with full detail (kernel dumps; slow)
- `dd <addr>`       dump memory as dwords
- `dt <type> <addr>` render a typed structure
- `.sympath`        show the symbol search path
- `version`         debugger and target version banner

Session-lifecycle commands (`q`, `.kill`, `.detach`, ...) are rejected;
use `close_session` instead.
"#;

pub fn resources() -> Vec<UsageResource> {
    vec![
        UsageResource {
            uri: "cdb-mcp://docs/workflow",
            name: "Crash-dump analysis workflow",
            description: "How to open a dump, queue commands, and poll results",
            mime_type: "text/markdown",
            text: WORKFLOW_DOC,
        },
        UsageResource {
            uri: "cdb-mcp://docs/commands",
            name: "Common debugger commands",
            description: "Frequently used cdb commands and their cost",
            mime_type: "text/markdown",
            text: COMMANDS_DOC,
        },
    ]
}

pub fn resource_text(uri: &str) -> Option<&'static UsageResource> {
    // The set is tiny and static; a linear scan beats carrying a map.
    static RESOURCES: std::sync::LazyLock<Vec<UsageResource>> =
        std::sync::LazyLock::new(resources);
    RESOURCES.iter().find(|resource| resource.uri == uri)
}
