//! Decoder for the telemetry lines the thermal actuator prints back over the
//! serial link, one per control tick:
//!
//! ```text
//! 10234,32.61,34.50,2.00,180,Received: 2.00
//! ```
//!
//! That is millis since boot, measured temperature, current setpoint, the
//! commanded delta, the heater PWM duty, and an echo of the last line the
//! actuator accepted. Anything else the firmware prints (boot banners, half
//! lines from a buffer that was still filling) is not telemetry.

use nom::{
    bytes::complete::take_till,
    character::complete::char,
    combinator::{all_consuming, map, verify},
    error::Error,
    sequence::{preceded, tuple},
    Finish, IResult,
};

use std::str::FromStr;

/// The token that marks a telemetry line as the actuator's echo.
pub const RECEIVED_MARKER: &str = "Received:";

/// Column names of the telemetry log.
pub const TELEMETRY_HEADER: [&str; 6] = [
    "Millis",
    "Input_Temperature",
    "Setpoint",
    "Delta",
    "PWM",
    "Received",
];

/// One well formed telemetry line, split into its six fields. The fields are
/// kept as the actuator printed them so the log is a faithful copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryRecord {
    /// Millis since actuator boot
    pub millis: String,
    /// Measured temperature
    pub input_temperature: String,
    /// Setpoint the controller is tracking
    pub setpoint: String,
    /// Commanded offset from baseline
    pub delta: String,
    /// Heater duty
    pub pwm: String,
    /// Echo of the last accepted command
    pub received: String,
}

impl TelemetryRecord {
    /// The fields in log column order.
    pub fn fields(&self) -> [&str; 6] {
        [
            self.millis.as_str(),
            self.input_temperature.as_str(),
            self.setpoint.as_str(),
            self.delta.as_str(),
            self.pwm.as_str(),
            self.received.as_str(),
        ]
    }
}

fn parse_field(s: &str) -> IResult<&str, String> {
    map(take_till(|c| c == ','), |f: &str| f.to_owned())(s)
}

fn parse_next_field(s: &str) -> IResult<&str, String> {
    preceded(char(','), parse_field)(s)
}

fn parse_received(s: &str) -> IResult<&str, String> {
    preceded(
        char(','),
        map(
            verify(take_till(|c| c == ','), |f: &str| f.contains(RECEIVED_MARKER)),
            |f: &str| f.to_owned(),
        ),
    )(s)
}

fn parse_telemetry(s: &str) -> IResult<&str, TelemetryRecord> {
    map(
        all_consuming(tuple((
            parse_field,
            parse_next_field,
            parse_next_field,
            parse_next_field,
            parse_next_field,
            parse_received,
        ))),
        |(millis, input_temperature, setpoint, delta, pwm, received)| TelemetryRecord {
            millis,
            input_temperature,
            setpoint,
            delta,
            pwm,
            received,
        },
    )(s)
}

impl FromStr for TelemetryRecord {
    type Err = Error<String>;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_telemetry(s.trim()).finish() {
            Ok((_remaining, record)) => Ok(record),
            Err(Error { input, code }) => Err(Error {
                input: input.to_string(),
                code,
            }),
        }
    }
}

/// Formats a setpoint the way the actuator expects it on the wire.
pub fn setpoint_line(value: f64) -> String {
    format!("{:.2}\n", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_1() {
        let s = "10234,32.61,34.50,2.00,180,Received: 2.00";

        let (leftover, res) = parse_telemetry(s).unwrap();

        assert_eq!(leftover, "");
        assert_eq!(
            res,
            TelemetryRecord {
                millis: "10234".to_owned(),
                input_temperature: "32.61".to_owned(),
                setpoint: "34.50".to_owned(),
                delta: "2.00".to_owned(),
                pwm: "180".to_owned(),
                received: "Received: 2.00".to_owned(),
            }
        );
    }

    #[test]
    fn test_2() {
        let res: TelemetryRecord = "512,32.48,32.50,0.00,0,Received: start\r\n".parse().unwrap();
        assert_eq!(res.received, "Received: start");
        assert_eq!(res.fields()[0], "512");
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        for s in [
            "10234,32.61,34.50,2.00,Received: 2.00",
            "10234,32.61,34.50,2.00,180,12,Received: 2.00",
            "10234,32.61,34.50,2.00,180,Received: 2.00,",
            "",
        ] {
            assert!(s.parse::<TelemetryRecord>().is_err(), "{:?} parsed", s);
        }
    }

    #[test]
    fn missing_marker_is_rejected() {
        assert!("10234,32.61,34.50,2.00,180,2.00"
            .parse::<TelemetryRecord>()
            .is_err());
        assert!("Thermal controller ready".parse::<TelemetryRecord>().is_err());
    }

    #[test]
    fn setpoints_go_out_with_two_decimals() {
        assert_eq!(setpoint_line(2.0), "2.00\n");
        assert_eq!(setpoint_line(-1.5), "-1.50\n");
        assert_eq!(setpoint_line(0.0), "0.00\n");
    }
}
