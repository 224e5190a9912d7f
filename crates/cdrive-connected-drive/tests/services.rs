//! Remote services against vehicles of configured accounts

mod common;

use cdrive_connected_drive::{RemoteAction, VehicleError, DOMAIN, SERVICE_UPDATE_STATE};
use cdrive_services::{Context, ServiceError};
use common::*;
use serde_json::json;

#[tokio::test]
async fn test_light_flash_reaches_vehicle() {
    let host = TestHost::new();
    let car = host.factory.add_vehicle("a", "WBA1234");
    host.add_account(account_data("a", "b", "North America", false)).await;

    let result = host
        .services
        .call(DOMAIN, "light_flash", json!({"vin": "WBA1234"}), Context::new())
        .await;

    assert!(matches!(result, Ok(None)));
    assert_eq!(car.remote.calls(), ["trigger_remote_light_flash"]);
}

#[tokio::test]
async fn test_each_command_maps_to_its_method() {
    let host = TestHost::new();
    let car = host.factory.add_vehicle("a", "WBA1234");
    host.add_account(account_data("a", "b", "rest_of_world", false)).await;

    for action in RemoteAction::ALL {
        host.services
            .call(DOMAIN, action.service(), json!({"vin": "WBA1234"}), Context::new())
            .await
            .unwrap();
    }

    assert_eq!(
        car.remote.calls(),
        [
            "trigger_remote_light_flash",
            "trigger_remote_horn",
            "trigger_remote_air_conditioning"
        ]
    );
}

#[tokio::test]
async fn test_unknown_vin_invokes_nothing() {
    let host = TestHost::new();
    let car = host.factory.add_vehicle("a", "WBA1234");
    host.add_account(account_data("a", "b", "rest_of_world", false)).await;

    let result = host
        .services
        .call(DOMAIN, "sound_horn", json!({"vin": "WBA9999"}), Context::new())
        .await;

    assert!(matches!(result, Ok(None)));
    assert!(car.remote.calls().is_empty());
}

#[tokio::test]
async fn test_missing_vin_rejected() {
    let host = TestHost::new();
    host.add_account(account_data("a", "b", "rest_of_world", false)).await;

    let result = host
        .services
        .call(DOMAIN, "sound_horn", json!({}), Context::new())
        .await;
    assert!(matches!(result, Err(ServiceError::InvalidData(_))));
}

#[tokio::test]
async fn test_shared_vin_uses_last_account() {
    let host = TestHost::new();
    let first_car = host.factory.add_vehicle("a", "WBA1234");
    let second_car = host.factory.add_vehicle("c", "WBA1234");
    host.add_account(account_data("a", "b", "rest_of_world", false)).await;
    host.add_account(account_data("c", "d", "rest_of_world", false)).await;

    host.services
        .call(DOMAIN, "sound_horn", json!({"vin": "WBA1234"}), Context::new())
        .await
        .unwrap();

    assert!(first_car.remote.calls().is_empty());
    assert_eq!(second_car.remote.calls(), ["trigger_remote_horn"]);
}

#[tokio::test]
async fn test_read_only_account_vehicle_not_controllable() {
    let host = TestHost::new();
    let ro_car = host.factory.add_vehicle("ro", "WBA5555");
    host.add_account(account_data("ro", "b", "rest_of_world", true)).await;
    host.add_account(account_data("rw", "b", "rest_of_world", false)).await;

    let result = host
        .services
        .call(DOMAIN, "light_flash", json!({"vin": "WBA5555"}), Context::new())
        .await;

    assert!(matches!(result, Ok(None)));
    assert!(ro_car.remote.calls().is_empty());
}

#[tokio::test]
async fn test_update_state_refreshes_every_account() {
    let host = TestHost::new();
    host.add_account(account_data("a", "b", "rest_of_world", false)).await;
    host.add_account(account_data("c", "d", "china", true)).await;
    let before = host.factory.refreshes();

    host.services
        .call(DOMAIN, SERVICE_UPDATE_STATE, json!(null), Context::new())
        .await
        .unwrap();

    assert_eq!(host.factory.refreshes(), before + 2);
}

#[tokio::test]
async fn test_update_state_swallows_connection_errors_only() {
    let host = TestHost::new();
    host.add_account(account_data("a", "b", "rest_of_world", false)).await;

    host.factory
        .fail_updates(Some(VehicleError::Connection("timeout".into())));
    let result = host
        .services
        .call(DOMAIN, SERVICE_UPDATE_STATE, json!(null), Context::new())
        .await;
    assert!(result.is_ok());

    host.factory
        .fail_updates(Some(VehicleError::Api("HTTP 500".into())));
    let result = host
        .services
        .call(DOMAIN, SERVICE_UPDATE_STATE, json!(null), Context::new())
        .await;
    assert!(matches!(result, Err(ServiceError::CallFailed(_))));
}
