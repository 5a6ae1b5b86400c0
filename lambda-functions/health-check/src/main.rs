use health_check::{HealthCheckProxy, ProxyResponse, ProxySettings};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::Value;

async fn function_handler(
    proxy: &HealthCheckProxy,
    _event: LambdaEvent<Value>,
) -> Result<ProxyResponse, Error> {
    Ok(proxy.handle().await)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let proxy = HealthCheckProxy::new(ProxySettings::from_env()?)?;
    let proxy = &proxy;

    run(service_fn(move |event| async move {
        function_handler(proxy, event).await
    }))
    .await
}
