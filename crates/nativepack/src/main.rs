fn main() -> anyhow::Result<()> {
    nativepack::run()
}
