fn main() -> anyhow::Result<()> {
    cardfile::cli::run()
}
