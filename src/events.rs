// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Advisory event emission. Events are an audit trail for humans; publish
//! failures are logged and never fail the reconciliation pass.

use crate::constants::OPERATOR_NAME;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::debug;

pub fn recorder(client: Client) -> Recorder {
    let reporter: Reporter = OPERATOR_NAME.to_string().into();
    Recorder::new(client, reporter)
}

pub async fn emit(
    recorder: &Recorder,
    reference: &ObjectReference,
    reason: &str,
    action: &str,
    note: String,
) {
    let event = Event {
        type_: EventType::Normal,
        reason: reason.to_string(),
        note: Some(note),
        action: action.to_string(),
        secondary: None,
    };

    if let Err(e) = recorder.publish(&event, reference).await {
        debug!("Failed to publish {} event: {}", reason, e);
    }
}

pub fn config_map_ref(namespace: &str, name: &str) -> ObjectReference {
    ObjectReference {
        api_version: Some("v1".to_string()),
        kind: Some("ConfigMap".to_string()),
        namespace: Some(namespace.to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

pub fn secret_ref(namespace: &str, name: &str) -> ObjectReference {
    ObjectReference {
        api_version: Some("v1".to_string()),
        kind: Some("Secret".to_string()),
        namespace: Some(namespace.to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}
