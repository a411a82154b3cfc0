//! Module/sensor topology loaded from the XML parameter file
//!
//! Layout:
//! ```xml
//! <Parameters>
//!   <Modules>
//!     <main_battery label="Main Battery">
//!       <voltage label="Voltage" lcb="44" lb="46" ub="54" ucb="56" unit="V"/>
//!     </main_battery>
//!   </Modules>
//! </Parameters>
//! ```
//! Element names are the tags; document order is kept.

use log::debug;
use std::path::Path;

use crate::error::ParameterError;
use crate::models::{Bounds, Module, Sensor};

const MODULES_SECTION: &str = "Modules";

pub fn load_modules(path: &Path) -> Result<Vec<Module>, ParameterError> {
    let content = std::fs::read_to_string(path).map_err(|source| ParameterError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let modules = parse_modules(&content)?;
    debug!(
        "Loaded {} modules from {}",
        modules.len(),
        path.display()
    );
    Ok(modules)
}

pub fn parse_modules(xml: &str) -> Result<Vec<Module>, ParameterError> {
    let document = roxmltree::Document::parse(xml)?;

    let section = document
        .root_element()
        .children()
        .find(|node| node.is_element() && node.has_tag_name(MODULES_SECTION))
        .ok_or_else(|| ParameterError::MissingSection(MODULES_SECTION.to_string()))?;

    section
        .children()
        .filter(|node| node.is_element())
        .map(parse_module)
        .collect()
}

fn parse_module(node: roxmltree::Node) -> Result<Module, ParameterError> {
    let tag = node.tag_name().name().to_string();
    let label = attribute(&node, "label")?.to_string();

    let sensors = node
        .children()
        .filter(|child| child.is_element())
        .map(|child| parse_sensor(child, &tag, &label))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Module {
        tag,
        label,
        sensors,
    })
}

fn parse_sensor(
    node: roxmltree::Node,
    parent_tag: &str,
    parent_label: &str,
) -> Result<Sensor, ParameterError> {
    let bounds = Bounds {
        lower_critical: bound(&node, "lcb")?,
        lower: bound(&node, "lb")?,
        upper: bound(&node, "ub")?,
        upper_critical: bound(&node, "ucb")?,
    };

    Ok(Sensor::new(
        node.tag_name().name(),
        attribute(&node, "label")?,
        parent_tag,
        parent_label,
        bounds,
        attribute(&node, "unit")?,
    ))
}

fn attribute<'a>(node: &roxmltree::Node<'a, '_>, name: &str) -> Result<&'a str, ParameterError> {
    node.attribute(name)
        .ok_or_else(|| ParameterError::MissingAttribute {
            element: node.tag_name().name().to_string(),
            attribute: name.to_string(),
        })
}

fn bound(node: &roxmltree::Node, name: &str) -> Result<f64, ParameterError> {
    let value = attribute(node, name)?;
    value
        .trim()
        .parse()
        .map_err(|_| ParameterError::InvalidBound {
            element: node.tag_name().name().to_string(),
            attribute: name.to_string(),
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<Parameters>
  <Settings/>
  <Modules>
    <main_battery label="Main Battery">
      <voltage label="Voltage" lcb="44" lb="46" ub="54" ucb="56" unit="V"/>
      <amperage label="Amperage" lcb="-50" lb="-40" ub="40" ucb="50" unit="A"/>
    </main_battery>
    <rfm95 label="Radio">
      <rssi label="Signal Strength" lcb="-120" lb="-100" ub="0" ucb="10" unit="dBm"/>
    </rfm95>
  </Modules>
</Parameters>"#;

    #[test]
    fn test_parse_keeps_document_order() {
        let modules = parse_modules(SAMPLE).unwrap();
        let tags: Vec<&str> = modules.iter().map(|m| m.tag.as_str()).collect();
        assert_eq!(tags, vec!["main_battery", "rfm95"]);

        let sensors: Vec<&str> = modules[0].sensors.iter().map(|s| s.tag.as_str()).collect();
        assert_eq!(sensors, vec!["voltage", "amperage"]);
    }

    #[test]
    fn test_parse_sensor_attributes() {
        let modules = parse_modules(SAMPLE).unwrap();
        let rssi = &modules[1].sensors[0];

        assert_eq!(rssi.label, "Signal Strength");
        assert_eq!(rssi.parent_label, "Radio");
        assert_eq!(rssi.unique_tag, "rfm95.rssi");
        assert_eq!(rssi.unit, "dBm");
        assert_eq!(
            rssi.bounds,
            Bounds {
                lower_critical: -120.0,
                lower: -100.0,
                upper: 0.0,
                upper_critical: 10.0,
            }
        );
    }

    #[test]
    fn test_missing_modules_section() {
        let err = parse_modules("<Parameters><Settings/></Parameters>").unwrap_err();
        assert!(matches!(err, ParameterError::MissingSection(_)));
    }

    #[test]
    fn test_missing_attribute() {
        let xml = r#"<P><Modules><dht11 label="DHT11"><temperature label="Temp" lcb="0" lb="5" ub="30"/></dht11></Modules></P>"#;
        match parse_modules(xml).unwrap_err() {
            ParameterError::MissingAttribute { element, attribute } => {
                assert_eq!(element, "temperature");
                assert_eq!(attribute, "ucb");
            }
            other => panic!("Expected MissingAttribute, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_bound() {
        let xml = r#"<P><Modules><dht11 label="DHT11"><temperature label="Temp" lcb="cold" lb="5" ub="30" ucb="40" unit="C"/></dht11></Modules></P>"#;
        assert!(matches!(
            parse_modules(xml).unwrap_err(),
            ParameterError::InvalidBound { .. }
        ));
    }

    #[test]
    fn test_bundled_parameters_cover_every_packet_target() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("Parameters.xml");
        let registry = crate::cache::Registry::new(load_modules(&path).unwrap(), 10).unwrap();

        let packet = crate::serial::PacketDecoder::default()
            .decode("50.2,1.3,12.1,22.5,100,-80")
            .unwrap();
        for write in packet.writes() {
            assert!(
                registry.sensor(&write.target.unique_tag()).is_some(),
                "{} missing from Parameters.xml",
                write.target
            );
        }
    }

    #[test]
    fn test_invalid_xml() {
        assert!(matches!(
            parse_modules("<Parameters><Modules>").unwrap_err(),
            ParameterError::Xml(_)
        ));
    }
}
