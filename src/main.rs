// Reads one JSON request per line on stdin: {"id", "channel", "payload"}.
// Writes one JSON response per line on stdout; logs go to stderr and the
// rolling log file.

fn main() -> anyhow::Result<()> {
    caixa_pos_lib::run()
}
