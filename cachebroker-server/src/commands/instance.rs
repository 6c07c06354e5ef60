use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use cachebroker_models::{
    Credentials, FailoverTestStarted, Operation, OperationProgress, ProgressReport,
    ProvisionParameters,
};
use reqwest::{Response, StatusCode};
use uuid::Uuid;

use crate::config::api_url;

/// Turn a non-success response into an error carrying the API's message
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body: serde_json::Value = response.json().await.unwrap_or_default();
    let message = body["error"].as_str().unwrap_or("no details").to_string();
    if status == StatusCode::NOT_FOUND {
        bail!("Not found: {}", message);
    }
    bail!("API error ({}): {}", status, message)
}

fn parse_parameters(raw: &[String]) -> Result<BTreeMap<String, String>> {
    raw.iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("parameter '{}' must be KEY=VALUE", pair))?;
            Ok((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

pub async fn run_provision(
    id: String,
    node_type: String,
    replicas: u32,
    tls_enabled: bool,
    parameters: Vec<String>,
) -> Result<()> {
    let params = ProvisionParameters {
        node_type,
        replicas_per_node_group: replicas,
        automatic_failover_enabled: replicas > 0,
        multi_az_enabled: replicas > 0,
        tls_enabled,
        parameters: parse_parameters(&parameters)?,
        ..Default::default()
    };

    let response = reqwest::Client::new()
        .put(format!("{}/v1/instances/{}", api_url(), id))
        .json(&params)
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to API: {}", e))?;
    check(response).await?;

    println!("✓ Provisioning started for '{}'", id);
    println!("  Poll with: cachebroker-server status {}", id);
    Ok(())
}

pub async fn run_deprovision(id: String, final_snapshot: Option<String>) -> Result<()> {
    let mut request = reqwest::Client::new().delete(format!("{}/v1/instances/{}", api_url(), id));
    if let Some(snapshot) = &final_snapshot {
        request = request.query(&[("final_snapshot_name", snapshot)]);
    }
    let response = request
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to API: {}", e))?;
    check(response).await?;

    println!("✓ Deprovisioning started for '{}'", id);
    if let Some(snapshot) = final_snapshot {
        println!("  Final snapshot: {}", snapshot);
    }
    println!("  Poll with: cachebroker-server status {} --operation deprovision", id);
    Ok(())
}

async fn fetch_status(
    client: &reqwest::Client,
    id: &str,
    operation: Operation,
    previous_primary: Option<&str>,
) -> Result<ProgressReport> {
    let mut query = vec![("operation", operation.to_string())];
    if let Some(node) = previous_primary {
        query.push(("previous_primary", node.to_string()));
    }
    let response = client
        .get(format!("{}/v1/instances/{}/last_operation", api_url(), id))
        .query(&query)
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to API: {}", e))?;
    Ok(check(response).await?.json().await?)
}

pub async fn run_status(
    id: String,
    operation: String,
    previous_primary: Option<String>,
    output: String,
) -> Result<()> {
    let operation: Operation = operation.parse()?;
    let client = reqwest::Client::new();
    let report = fetch_status(&client, &id, operation, previous_primary.as_deref()).await?;

    if output == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Instance: {}", id);
        println!("{}", "=".repeat(60));
        println!("  Operation: {}", operation);
        println!("  State:     {}", report.state);
        println!("  Progress:  {:?}", report.progress);
        println!("  Message:   {}", report.message);
    }
    Ok(())
}

pub async fn run_bind(id: String, binding_id: Option<String>) -> Result<()> {
    let binding_id = binding_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let response = reqwest::Client::new()
        .put(format!("{}/v1/instances/{}/bindings/{}", api_url(), id, binding_id))
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to API: {}", e))?;
    let credentials: Credentials = check(response).await?.json().await?;

    println!("Binding: {}", binding_id);
    println!("{}", "=".repeat(60));
    println!("  Host:     {}", credentials.host);
    println!("  Port:     {}", credentials.port);
    println!("  Name:     {}", credentials.name);
    println!("  TLS:      {}", credentials.tls_enabled);
    println!("  URI:      {}", credentials.uri);
    Ok(())
}

pub async fn run_failover_test(id: String, interval: u64) -> Result<()> {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/v1/instances/{}/failover_test", api_url(), id))
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to API: {}", e))?;
    let started: FailoverTestStarted = check(response).await?.json().await?;
    println!(
        "✓ Failover test started, previous primary: {}",
        started.previous_primary_node_id
    );

    loop {
        tokio::time::sleep(Duration::from_secs(interval)).await;
        let report = fetch_status(
            &client,
            &id,
            Operation::FailoverTest,
            Some(&started.previous_primary_node_id),
        )
        .await?;
        println!("  {} - {}", report.state, report.message);

        match report.progress {
            OperationProgress::Succeeded => {
                println!("✓ Failover test complete");
                return Ok(());
            }
            OperationProgress::Failed => bail!("Failover test failed: {}", report.message),
            OperationProgress::InProgress => {}
        }
    }
}
