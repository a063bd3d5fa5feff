mod build_lifecycle;
mod fail_fast;
mod local_commands;
