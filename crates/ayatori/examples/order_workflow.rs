//! Order processing workflow with branching, fan-out and retries.
//!
//! Demonstrates:
//! - Task handlers registered by resource type
//! - Choice routing on document data
//! - Map over order lines with a concurrency cap
//! - Retry with backoff, then Catch into a compensation path

use async_trait::async_trait;
use ayatori::prelude::*;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

const DEFINITION: &str = r#"{
    "Comment": "Validate, price and charge an order",
    "StartAt": "Validate",
    "TimeoutSeconds": 30,
    "States": {
        "Validate": {
            "Type": "Choice",
            "Choices": [
                {"Variable": "$.items[0]", "IsPresent": true, "Next": "PriceLines"}
            ],
            "Default": "Rejected"
        },
        "PriceLines": {
            "Type": "Map",
            "ItemsPath": "$.items",
            "MaxConcurrency": 2,
            "Iterator": {
                "StartAt": "Price",
                "States": {
                    "Price": {"Type": "Task", "Resource": "shop:price", "End": true}
                }
            },
            "ResultPath": "$.lines",
            "Next": "Charge"
        },
        "Charge": {
            "Type": "Task",
            "Resource": "payments:charge",
            "Parameters": {
                "order.$": "$.id",
                "memo.$": "States.Format('order {} for {}', $.id, $.customer)"
            },
            "ResultPath": "$.payment",
            "Retry": [
                {"ErrorEquals": ["Payments.Unavailable"], "IntervalSeconds": 1, "MaxAttempts": 2}
            ],
            "Catch": [
                {"ErrorEquals": ["States.ALL"], "Next": "Refund", "ResultPath": "$.error"}
            ],
            "Next": "Done"
        },
        "Refund": {"Type": "Pass", "Result": "refunded", "ResultPath": "$.status", "End": true},
        "Rejected": {"Type": "Fail", "Error": "Order.Empty", "Cause": "order has no items"},
        "Done": {"Type": "Succeed"}
    }
}"#;

fn price(_locator: &str, line: Map<String, Value>) -> Result<Value, StatesError> {
    let quantity = line.get("quantity").and_then(Value::as_f64).unwrap_or(0.0);
    let unit = line.get("unit_price").and_then(Value::as_f64).unwrap_or(0.0);
    Ok(json!({"sku": line.get("sku"), "total": quantity * unit}))
}

/// Payment gateway that is unavailable on its first call.
#[derive(Debug, Default)]
struct Payments {
    calls: AtomicU32,
}

#[async_trait]
impl TaskHandler for Payments {
    async fn invoke(
        &self,
        ctx: &TaskContext,
        locator: &str,
        input: Map<String, Value>,
    ) -> Result<Value, StatesError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        println!("[{}] {locator} attempt {}: {:?}", ctx.state(), call + 1, input.get("memo"));
        if call == 0 {
            return Err(StatesError::new("Payments.Unavailable", "gateway warming up"));
        }
        Ok(json!({"transaction": format!("tx-{}", ctx.run_id().simple()), "status": "charged"}))
    }
}

#[tokio::main]
async fn main() -> Result<(), WorkflowError> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let workflow = Arc::new(Workflow::from_json(DEFINITION)?);
    let engine = Engine::builder()
        .register("shop", price)
        .register_arc("payments", Arc::new(Payments::default()))
        .build()?;

    let order = json!({
        "id": "A-1001",
        "customer": "C-42",
        "items": [
            {"sku": "pen", "quantity": 3, "unit_price": 1.5},
            {"sku": "pad", "quantity": 1, "unit_price": 4.0},
            {"sku": "ink", "quantity": 2, "unit_price": 7.25}
        ]
    });

    let execution = engine.execute(Arc::clone(&workflow), order).await;
    println!("run {} finished in {:?}", execution.run_id, execution.elapsed);
    match &execution.outcome {
        RunOutcome::Succeeded(output) => println!("{output:#}"),
        RunOutcome::Failed(failure) => println!("failed: {failure}"),
        RunOutcome::Cancelled => println!("cancelled"),
    }

    let empty = engine.execute(workflow, json!({"id": "A-1002", "items": []})).await;
    println!("empty order: {:?}", empty.outcome);
    Ok(())
}
