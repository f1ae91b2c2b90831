use clap::Parser;

fn main() -> anyhow::Result<()> {
    let cfg = virtauthn::config::Config::parse();
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async {
            if cfg.wipe {
                virtauthn::wipe(cfg).await
            } else {
                virtauthn::run(cfg).await
            }
        })
}
