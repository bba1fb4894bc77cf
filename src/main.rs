use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;

use newsletter_server::Error;

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_span_events(FmtSpan::NEW)
        .compact()
        .init();

    newsletter_server::run(true)
}
