use crate::attributes::{marshal_item, marshal_value, unmarshal_item, Item};
use crate::error::PipelineError;
use crate::signing::SigV4Signer;
use crate::traits::{DocumentTable, PutCondition, UpdateOutcome};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

const TARGET_PREFIX: &str = "DynamoDB_20120810";
const CONTENT_TYPE: &str = "application/x-amz-json-1.0";
const CONDITION_FAILED: &str = "ConditionalCheckFailedException";

/// Error body returned by a DynamoDB call.
#[derive(Debug, Clone)]
struct ServiceError {
    kind: String,
    message: String,
    body: Value,
}

impl ServiceError {
    fn is_condition_failure(&self) -> bool {
        self.kind.ends_with(CONDITION_FAILED)
    }
}

/// DynamoDB table over the JSON 1.0 protocol.
pub struct DynamoDbTable {
    client: Client,
    signer: SigV4Signer,
    table_name: String,
    endpoint: Url,
}

impl DynamoDbTable {
    pub fn new(
        signer: SigV4Signer,
        table_name: impl Into<String>,
        endpoint: Option<String>,
    ) -> Result<Self, PipelineError> {
        let raw = endpoint
            .unwrap_or_else(|| format!("https://dynamodb.{}.amazonaws.com/", signer.region()));
        let endpoint = Url::parse(&raw).map_err(|error| PipelineError::Signing(error.into()))?;
        Ok(Self {
            client: Client::new(),
            signer,
            table_name: table_name.into(),
            endpoint,
        })
    }

    async fn call(
        &self,
        operation: &str,
        body: Value,
    ) -> Result<Result<Value, ServiceError>, PipelineError> {
        let payload = serde_json::to_vec(&body)?;
        let target = format!("{TARGET_PREFIX}.{operation}");
        let headers = self.signer.sign(
            "POST",
            &self.endpoint,
            &[("content-type", CONTENT_TYPE), ("x-amz-target", &target)],
            &payload,
            Utc::now(),
        )?;

        let mut request = self.client.post(self.endpoint.clone());
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.body(payload).send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        debug!(%operation, %status, "dynamodb request");

        let value: Value = if bytes.is_empty() {
            json!({})
        } else {
            serde_json::from_slice(&bytes)?
        };
        if status.is_success() {
            return Ok(Ok(value));
        }

        let kind = value
            .get("__type")
            .and_then(Value::as_str)
            .unwrap_or("UnknownError")
            .to_string();
        let message = value
            .get("message")
            .or_else(|| value.get("Message"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Err(ServiceError {
            kind,
            message,
            body: value,
        }))
    }

    async fn call_ok(&self, operation: &str, body: Value) -> Result<Value, PipelineError> {
        self.call(operation, body).await?.map_err(|error| {
            PipelineError::Table(format!("{operation} failed: {} {}", error.kind, error.message))
        })
    }

    fn key(pk: &str, sk: &str) -> Value {
        json!({ "pk": { "S": pk }, "sk": { "S": sk } })
    }
}

#[async_trait]
impl DocumentTable for DynamoDbTable {
    async fn put_item(&self, item: Item, condition: PutCondition) -> Result<(), PipelineError> {
        let mut body = json!({
            "TableName": self.table_name,
            "Item": marshal_item(&item),
        });
        match condition {
            PutCondition::Overwrite => {}
            PutCondition::IfAbsent => {
                body["ConditionExpression"] = json!("attribute_not_exists(sk)");
            }
            PutCondition::IfStatus(expected) => {
                body["ConditionExpression"] =
                    json!("attribute_not_exists(sk) OR #status = :expected");
                body["ExpressionAttributeNames"] = json!({ "#status": "status" });
                body["ExpressionAttributeValues"] = json!({ ":expected": { "S": expected } });
            }
        }

        match self.call("PutItem", body).await? {
            Ok(_) => Ok(()),
            Err(error) if error.is_condition_failure() => {
                let sort_key = item.get("sk").and_then(Value::as_str).unwrap_or_default();
                Err(PipelineError::AlreadyExists(sort_key.to_string()))
            }
            Err(error) => Err(PipelineError::Table(format!(
                "PutItem failed: {} {}",
                error.kind, error.message
            ))),
        }
    }

    async fn get_item(&self, pk: &str, sk: &str) -> Result<Option<Item>, PipelineError> {
        let response = self
            .call_ok(
                "GetItem",
                json!({
                    "TableName": self.table_name,
                    "Key": Self::key(pk, sk),
                    "ConsistentRead": true,
                }),
            )
            .await?;

        response
            .get("Item")
            .map(|image| unmarshal_item(image).map_err(PipelineError::MalformedRecord))
            .transpose()
    }

    async fn update_attribute(
        &self,
        pk: &str,
        sk: &str,
        attribute: &str,
        expected: &str,
        next: &str,
    ) -> Result<UpdateOutcome, PipelineError> {
        let body = json!({
            "TableName": self.table_name,
            "Key": Self::key(pk, sk),
            "UpdateExpression": "SET #attr = :next",
            "ConditionExpression": "attribute_exists(sk) AND #attr = :expected",
            "ExpressionAttributeNames": { "#attr": attribute },
            "ExpressionAttributeValues": {
                ":next": marshal_value(&json!(next)),
                ":expected": marshal_value(&json!(expected)),
            },
            "ReturnValuesOnConditionCheckFailure": "ALL_OLD",
        });

        match self.call("UpdateItem", body).await? {
            Ok(_) => Ok(UpdateOutcome::Updated),
            Err(error) if error.is_condition_failure() => match error.body.get("Item") {
                Some(image) => {
                    let old = unmarshal_item(image).map_err(PipelineError::MalformedRecord)?;
                    Ok(UpdateOutcome::Conflict {
                        current: old.get(attribute).and_then(Value::as_str).map(str::to_string),
                    })
                }
                None => Ok(UpdateOutcome::Missing),
            },
            Err(error) => Err(PipelineError::Table(format!(
                "UpdateItem failed: {} {}",
                error.kind, error.message
            ))),
        }
    }

    async fn query_prefix(&self, pk: &str, sort_prefix: &str) -> Result<Vec<Item>, PipelineError> {
        let mut items = Vec::new();
        let mut start_key: Option<Value> = None;

        loop {
            let mut body = json!({
                "TableName": self.table_name,
                "KeyConditionExpression": "pk = :pk AND begins_with(sk, :prefix)",
                "ExpressionAttributeValues": {
                    ":pk": { "S": pk },
                    ":prefix": { "S": sort_prefix },
                },
                "ConsistentRead": true,
            });
            if let Some(key) = start_key.take() {
                body["ExclusiveStartKey"] = key;
            }

            let page = self.call_ok("Query", body).await?;
            for image in page.get("Items").and_then(Value::as_array).into_iter().flatten() {
                items.push(unmarshal_item(image).map_err(PipelineError::MalformedRecord)?);
            }

            match page.get("LastEvaluatedKey") {
                Some(key) if !key.is_null() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::AwsCredentials;
    use httpmock::{Method::POST, MockServer};

    fn table(server: &MockServer) -> DynamoDbTable {
        let credentials = AwsCredentials::new("AKID", "secret", None);
        let signer = SigV4Signer::new(credentials, "eu-central-1", "dynamodb");
        DynamoDbTable::new(signer, "pdf-data", Some(server.url("/"))).expect("table")
    }

    fn condition_failed(item: Option<Value>) -> Value {
        let mut body = json!({
            "__type": "com.amazonaws.dynamodb.v20120810#ConditionalCheckFailedException",
            "message": "The conditional request failed",
        });
        if let Some(item) = item {
            body["Item"] = item;
        }
        body
    }

    #[tokio::test]
    async fn conditional_put_maps_to_already_exists() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/")
                    .header("x-amz-target", "DynamoDB_20120810.PutItem")
                    .json_body_partial(r#"{"ConditionExpression":"attribute_not_exists(sk)"}"#);
                then.status(400).json_body(condition_failed(None));
            })
            .await;

        let item: Item =
            serde_json::from_value(json!({ "pk": "FILE", "sk": "FILE#a" })).expect("item");
        let error = table(&server)
            .put_item(item, PutCondition::IfAbsent)
            .await
            .expect_err("exists");
        assert!(matches!(error, PipelineError::AlreadyExists(ref key) if key == "FILE#a"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn status_guarded_put_sends_the_observed_status() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/")
                    .header("x-amz-target", "DynamoDB_20120810.PutItem")
                    .json_body_partial(
                        r##"{
                            "ConditionExpression":
                                "attribute_not_exists(sk) OR #status = :expected",
                            "ExpressionAttributeNames": { "#status": "status" },
                            "ExpressionAttributeValues": {
                                ":expected": { "S": "PENDING_EMBEDDINGS" }
                            }
                        }"##,
                    );
                then.status(400).json_body(condition_failed(None));
            })
            .await;

        let item: Item = serde_json::from_value(json!({
            "pk": "FILE",
            "sk": "FILE#a",
            "status": "PENDING_EMBEDDINGS",
        }))
        .expect("item");
        let error = table(&server)
            .put_item(item, PutCondition::IfStatus("PENDING_EMBEDDINGS"))
            .await
            .expect_err("moved on");
        assert!(matches!(error, PipelineError::AlreadyExists(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn get_item_unmarshals_attributes() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).header("x-amz-target", "DynamoDB_20120810.GetItem");
                then.status(200).json_body(json!({
                    "Item": {
                        "pk": { "S": "FILE" },
                        "sk": { "S": "FILE#a" },
                        "status": { "S": "READY" }
                    }
                }));
            })
            .await;

        let item = table(&server).get_item("FILE", "FILE#a").await.expect("get").expect("found");
        assert_eq!(item["status"], "READY");
    }

    #[tokio::test]
    async fn update_distinguishes_missing_from_conflict() {
        let server = MockServer::start_async().await;
        let mut conflict = server
            .mock_async(|when, then| {
                when.method(POST)
                    .header("x-amz-target", "DynamoDB_20120810.UpdateItem")
                    .json_body_partial(r#"{"Key":{"sk":{"S":"FILE#a"}}}"#);
                then.status(400).json_body(condition_failed(Some(json!({
                    "status": { "S": "READY" }
                }))));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .header("x-amz-target", "DynamoDB_20120810.UpdateItem")
                    .json_body_partial(r#"{"Key":{"sk":{"S":"FILE#b"}}}"#);
                then.status(400).json_body(condition_failed(None));
            })
            .await;

        let table = table(&server);
        let outcome = table
            .update_attribute("FILE", "FILE#a", "status", "PENDING_EMBEDDINGS", "READY")
            .await
            .expect("update");
        assert_eq!(
            outcome,
            UpdateOutcome::Conflict {
                current: Some("READY".to_string())
            }
        );
        conflict.delete_async().await;

        let outcome = table
            .update_attribute("FILE", "FILE#b", "status", "PENDING_EMBEDDINGS", "READY")
            .await
            .expect("update");
        assert_eq!(outcome, UpdateOutcome::Missing);
    }

    #[tokio::test]
    async fn query_follows_pagination() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .header("x-amz-target", "DynamoDB_20120810.Query")
                    .json_body_partial(r#"{"ExclusiveStartKey":{"sk":{"S":"FILE#a"}}}"#);
                then.status(200).json_body(json!({
                    "Items": [{ "pk": { "S": "FILE" }, "sk": { "S": "FILE#b" } }]
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .header("x-amz-target", "DynamoDB_20120810.Query")
                    .matches(|request| {
                        let body = request.body.as_deref().unwrap_or_default();
                        !String::from_utf8_lossy(body).contains("ExclusiveStartKey")
                    });
                then.status(200).json_body(json!({
                    "Items": [{ "pk": { "S": "FILE" }, "sk": { "S": "FILE#a" } }],
                    "LastEvaluatedKey": { "pk": { "S": "FILE" }, "sk": { "S": "FILE#a" } }
                }));
            })
            .await;

        let items = table(&server).query_prefix("FILE", "FILE#").await.expect("query");
        let keys: Vec<_> = items.iter().filter_map(|item| item["sk"].as_str()).collect();
        assert_eq!(keys, vec!["FILE#a", "FILE#b"]);
    }

    #[tokio::test]
    async fn service_errors_become_table_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(400).json_body(json!({
                    "__type": "com.amazonaws.dynamodb.v20120810#ResourceNotFoundException",
                    "message": "Requested resource not found"
                }));
            })
            .await;

        let error = table(&server).get_item("FILE", "FILE#a").await.expect_err("missing table");
        assert!(matches!(
            error,
            PipelineError::Table(ref message) if message.contains("ResourceNotFound")
        ));
    }
}
