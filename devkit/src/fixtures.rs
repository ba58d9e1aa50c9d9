/*!
Fixtures JSON au format du cloud Meross
*/

use serde_json::{json, Value};

/// Entrée de `/v1/Device/devList` (`onlineStatus` : 1 online, 2 offline...)
pub fn device_record(uuid: &str, name: &str, device_type: &str, online_status: i64) -> Value {
    json!({
        "uuid": uuid,
        "devName": name,
        "deviceType": device_type,
        "onlineStatus": online_status,
        "domain": null,
    })
}

/// Payload d'un GETACK `Appliance.Control.Electricity`, unités du device
/// (mW, dV, mA) calculées à partir de valeurs SI
pub fn electricity_payload(watts: f64, volts: f64, amps: f64) -> Value {
    json!({
        "electricity": {
            "channel": 0,
            "power": (watts * 1000.0).round() as i64,
            "voltage": (volts * 10.0).round() as i64,
            "current": (amps * 1000.0).round() as i64,
        }
    })
}
