#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

/// Commands that submit a backend job; leading `key=value` words are options.
pub(crate) const GENERATION_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "imagine",
        action: "generate_image",
    },
    CommandSpec {
        command: "image",
        action: "generate_image",
    },
    CommandSpec {
        command: "speech",
        action: "generate_speech",
    },
    CommandSpec {
        command: "music",
        action: "generate_music",
    },
    CommandSpec {
        command: "video",
        action: "generate_video",
    },
];

pub(crate) const GENERATION_OPTION_KEYS: &[&str] = &["model", "resolution", "language"];

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "image_model",
        action: "set_image_model",
    },
    CommandSpec {
        command: "speech_model",
        action: "set_speech_model",
    },
    CommandSpec {
        command: "resolution",
        action: "set_resolution",
    },
    CommandSpec {
        command: "persona",
        action: "set_instructions",
    },
    CommandSpec {
        command: "actor",
        action: "set_actor",
    },
    CommandSpec {
        command: "channel",
        action: "set_channel",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "clear",
        action: "clear_history",
    },
    CommandSpec {
        command: "export",
        action: "export_history",
    },
    CommandSpec {
        command: "style",
        action: "toggle_style",
    },
    CommandSpec {
        command: "urls",
        action: "toggle_urls",
    },
    CommandSpec {
        command: "enhance",
        action: "toggle_enhance",
    },
    CommandSpec {
        command: "persona_clear",
        action: "clear_instructions",
    },
    CommandSpec {
        command: "always_respond",
        action: "toggle_always_respond",
    },
    CommandSpec {
        command: "respond_to_all",
        action: "toggle_channel",
    },
    CommandSpec {
        command: "stop",
        action: "stop",
    },
    CommandSpec {
        command: "adapters",
        action: "list_adapters",
    },
    CommandSpec {
        command: "settings",
        action: "show_settings",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub(crate) const ATTACH_COMMAND: CommandSpec = CommandSpec {
    command: "attach",
    action: "chat",
};

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/imagine [model=NAME] [resolution=Square|Wide|Portrait] PROMPT",
    "/speech [language=English] TEXT",
    "/music PROMPT",
    "/video PROMPT",
    "/attach PATH [MESSAGE]",
    "/image_model NAME",
    "/speech_model NAME",
    "/resolution Square|Wide|Portrait",
    "/persona TEXT",
    "/persona_clear",
    "/style",
    "/urls",
    "/enhance",
    "/clear",
    "/export",
    "/stop",
    "/always_respond",
    "/respond_to_all",
    "/actor ID",
    "/channel NAME",
    "/adapters",
    "/settings",
    "/help",
    "/quit",
];
