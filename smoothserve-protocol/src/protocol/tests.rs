use super::*;

#[test]
fn form_uses_lowercase_action() {
    let request = CommandRequest::new(Action::Restart, Some("web".to_string()));
    assert_eq!(request.to_form().unwrap(), "action=restart&service_name=web");
}

#[test]
fn form_omits_missing_service() {
    let request = CommandRequest::new(Action::Stop, None);
    assert_eq!(request.to_form().unwrap(), "action=stop");
}

#[test]
fn form_decodes_without_service() {
    let request = CommandRequest::from_form(b"action=start").unwrap();
    assert_eq!(request.action, Action::Start);
    assert_eq!(request.target(), None);
}

#[test]
fn empty_service_name_targets_everything() {
    let request = CommandRequest::from_form(b"action=restart&service_name=").unwrap();
    assert_eq!(request.target(), None);

    let request = CommandRequest::from_form(b"action=restart&service_name=+api+").unwrap();
    assert_eq!(request.target(), Some("api"));
}

#[test]
fn unknown_action_is_rejected() {
    let err = CommandRequest::from_form(b"action=reload").unwrap_err();
    assert!(matches!(err, ProtocolError::DecodeForm(_)));
}

#[test]
fn missing_action_is_rejected() {
    assert!(CommandRequest::from_form(b"service_name=web").is_err());
}

#[test]
fn response_json_shape() {
    let response = Response::ok_with_message("restarting web");
    let json: serde_json::Value = serde_json::from_slice(&encode_response(&response).unwrap()).unwrap();
    assert_eq!(json["Ok"]["message"], "restarting web");
    assert!(json["Ok"]["data"].is_null());

    let json: serde_json::Value =
        serde_json::from_slice(&encode_response(&Response::error("nope")).unwrap()).unwrap();
    assert_eq!(json["Error"]["message"], "nope");
}

#[test]
fn decode_services_payload() {
    let body = br#"{"Ok":{"message":null,"data":{"Services":[{"name":"web","server_names":["a.local"],"port":8080,"instances":[{"slot":0,"port":9000,"pid":42,"status":"running"}]}]}}}"#;
    let Response::Ok { data: Some(ResponseData::Services(services)), .. } = decode_response(body).unwrap() else {
        panic!("expected services payload");
    };
    assert_eq!(services[0].name, "web");
    assert_eq!(services[0].restarts_completed, 0);
    assert!(!services[0].instances[0].needs_restart);
    assert_eq!(services[0].serving_count(), 1);
}

#[test]
fn decode_rejects_oversized_body() {
    let body = vec![b' '; MAX_RESPONSE_SIZE + 1];
    assert!(matches!(decode_response(&body), Err(ProtocolError::TooLarge(_))));
}
