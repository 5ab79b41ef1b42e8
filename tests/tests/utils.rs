use mock_service::MockConfig;
use std::sync::OnceLock;
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[allow(unused)]
pub fn init() {
    static ONCE_LOCK: OnceLock<()> = OnceLock::new();

    ONCE_LOCK.get_or_init(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            default_panic(info);
            error!("Panic occurred: {info:?}");
        }));

        let _ = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::new(
                "surge=debug,pr_review_load=debug,mock_service=debug",
            ))
            .with_test_writer()
            .try_init();
    });
}

/// Base URL of a freshly spawned mock service.
#[allow(unused)]
pub async fn mock(config: MockConfig) -> String {
    init();
    let addr = mock_service::spawn(config)
        .await
        .expect("mock service binds an ephemeral port");
    format!("http://{addr}")
}
