//! Subcommand implementations.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::sync::broadcast::error::RecvError;

use callguard_core::{CallContext, Client, ClientConfig, Payload};
use callguard_sim::service::{BIDI_STREAMING, CLIENT_STREAMING, SERVER_STREAMING, UNARY};
use callguard_sim::{ResiliencyRequest, ResiliencyResponse};

use crate::settings::{demo_breaker, Settings};
use crate::CallArgs;

fn client(settings: &Settings) -> Result<Client> {
    client_with(settings, &settings.client)
}

fn client_with(settings: &Settings, config: &ClientConfig) -> Result<Client> {
    let transport = Arc::new(settings.sim.build());
    Client::from_config(transport, config).context("building client")
}

fn request(args: &CallArgs) -> Payload {
    ResiliencyRequest::new(args.min_delay, args.max_delay, args.codes.clone()).to_payload()
}

fn context(args: &CallArgs) -> CallContext {
    match args.timeout_ms {
        Some(ms) => CallContext::new().with_timeout(Duration::from_millis(ms)),
        None => CallContext::new(),
    }
}

fn print_reply(reply: &Payload) {
    match ResiliencyResponse::from_payload(reply) {
        Ok(r) => println!("{}", r.dummy_string),
        Err(_) => println!("{reply}"),
    }
}

pub async fn unary(settings: &Settings, args: &CallArgs) -> Result<()> {
    let client = client(settings)?;
    let reply = client
        .invoke(context(args), UNARY, request(args))
        .await
        .context("UnaryResiliency failed")?;
    print_reply(&reply);
    Ok(())
}

pub async fn server_stream(settings: &Settings, args: &CallArgs) -> Result<()> {
    let client = client(settings)?;
    let mut call = client
        .server_stream(context(args), SERVER_STREAMING, request(args))
        .await
        .context("opening ServerStreamingResiliency")?;
    while let Some(reply) = call.next().await {
        print_reply(&reply);
    }
    let summary = call.join().await.context("ServerStreamingResiliency failed")?;
    tracing::info!(received = summary.received, "server stream finished");
    Ok(())
}

pub async fn client_stream(settings: &Settings, args: &CallArgs, count: usize) -> Result<()> {
    let client = client(settings)?;
    let req = request(args);
    let outbound = futures::stream::iter(std::iter::repeat(req).take(count));
    let reply = client
        .client_stream(context(args), CLIENT_STREAMING, outbound)
        .await
        .context("ClientStreamingResiliency failed")?;
    print_reply(&reply);
    Ok(())
}

pub async fn bidi(settings: &Settings, args: &CallArgs, count: usize) -> Result<()> {
    let client = client(settings)?;
    let req = request(args);
    let outbound = futures::stream::iter(std::iter::repeat(req).take(count));
    let mut call = client
        .open_duplex_stream(context(args), BIDI_STREAMING, outbound)
        .await
        .context("opening BiDirectionalResiliency")?;

    let mut replies = call.messages();
    while let Some(reply) = replies.next().await {
        print_reply(&reply);
    }
    drop(replies);

    let summary = call.join().await.context("BiDirectionalResiliency failed")?;
    tracing::info!(
        sent = summary.sent,
        received = summary.received,
        "bidirectional stream finished"
    );
    Ok(())
}

pub async fn breaker(
    settings: &Settings,
    args: &CallArgs,
    count: usize,
    interval_ms: u64,
) -> Result<()> {
    let mut config = settings.client.clone();
    config.circuit_breaker.get_or_insert_with(demo_breaker);
    let client = client_with(settings, &config)?;
    let breaker = client
        .breaker()
        .cloned()
        .context("client was built without a circuit breaker")?;

    let mut events = breaker.subscribe();
    let watcher = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(change) => tracing::info!(
                    breaker = %change.breaker,
                    from = %change.from,
                    to = %change.to,
                    generation = change.generation,
                    "circuit breaker changed state"
                ),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "state change events dropped")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut rejected = 0usize;
    let mut failed = 0usize;
    for i in 1..=count {
        match client.invoke(context(args), UNARY, request(args)).await {
            Ok(reply) => print_reply(&reply),
            Err(e) if e.is_circuit_open() => {
                rejected += 1;
                tracing::warn!(call = i, state = %breaker.state(), "rejected: {e}");
            }
            Err(e) => {
                failed += 1;
                tracing::warn!(call = i, state = %breaker.state(), "call failed: {e}");
            }
        }
        tokio::time::sleep(Duration::from_millis(interval_ms)).await;
    }

    watcher.abort();
    println!("{count} calls: {failed} failed, {rejected} rejected by the breaker");
    Ok(())
}
