use anyhow::Result;
use stocksim::catalog::Catalog;
use stocksim::config::Config;
use stocksim::logging::{log, obj, v_str, Domain, Level};
use stocksim::runner::{run, Simulation};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let sink = match cfg.sink.build(&cfg) {
        Ok(sink) => sink,
        Err(err) => {
            log(
                Level::Error,
                Domain::Telemetry,
                "sink_init_failed",
                obj(&[("sink", v_str(cfg.sink.as_str())), ("error", v_str(&err.to_string()))]),
            );
            return Err(err);
        }
    };
    let sim = Simulation::new(&cfg, Catalog::standard());

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            eprintln!("[stocksim] failed to listen for ctrl-c: {}", err);
            std::future::pending::<()>().await;
        }
    };
    let report = run(sim, sink, &cfg, shutdown).await;

    eprintln!(
        "[stocksim] stopped after {} ticks, last price {:.4}, {} points written, {} dropped",
        report.summary.ticks, report.summary.last_price, report.writer.written, report.writer.dropped
    );
    Ok(())
}
