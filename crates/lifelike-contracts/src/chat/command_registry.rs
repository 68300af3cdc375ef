#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "open",
        action: "open_creation",
    },
    CommandSpec {
        command: "say",
        action: "dictate",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "file",
        action: "select_file",
    },
    CommandSpec {
        command: "import",
        action: "import",
    },
    CommandSpec {
        command: "export",
        action: "export",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "clear",
        action: "clear_input",
    },
    CommandSpec {
        command: "history",
        action: "list_history",
    },
    CommandSpec {
        command: "reset",
        action: "reset",
    },
    CommandSpec {
        command: "listen",
        action: "toggle_dictation",
    },
    CommandSpec {
        command: "send",
        action: "submit",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
];

pub const STUDIO_HELP_COMMANDS: &[&str] = &[
    "/file",
    "/clear",
    "/send",
    "/say",
    "/listen",
    "/history",
    "/open",
    "/reset",
    "/import",
    "/export",
    "/help",
];
