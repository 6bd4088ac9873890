//! Default TOML config template with inline documentation comments.

pub(crate) fn default_config_toml() -> &'static str {
    r##"# Taskflow hub configuration
# Only override what you want to change -- missing fields use defaults.

[server]
# bind = "0.0.0.0"
# port = 5000
# hello_timeout_secs = 10   # 1-120
# outbound_queue = 256      # frames buffered per connection, 8-65536

[presence]
# max_participants_per_channel = 0   # 0 = unlimited

[events]
# typing_timeout_ms = 3000   # 500-60000
# history_per_channel = 500  # 1-10000

[mesh]
# ice_servers = ["stun:stun.l.google.com:19302"]

[logging]
# filter = "taskflow_hub=info"
"##
}
