//! `<stream:features/>` as far as session negotiation cares about it.

use minidom::Element;

use super::ns;
use crate::error::ProtocolError;

/// STARTTLS offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartTlsFeature {
    /// The peer insists on TLS.
    pub required: bool,
}

/// XEP-0386 offer, nested in the SASL2 inline section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bind2Feature {
    /// Namespaces of features which can be enabled as part of the bind.
    pub inline_features: Vec<String>,
}

/// XEP-0388 offer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sasl2Feature {
    /// Mechanism names, in the peer's order.
    pub mechanisms: Vec<String>,
    /// XEP-0198 resumption may be attempted inline.
    pub inline_sm: bool,
    /// Bind 2 is available inline.
    pub bind2: Option<Bind2Feature>,
}

/// The subset of stream features which drive negotiation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamFeatures {
    /// STARTTLS offer, if any.
    pub starttls: Option<StartTlsFeature>,
    /// RFC 6120 SASL mechanisms, in the peer's order.
    pub sasl_mechanisms: Vec<String>,
    /// XEP-0388 offer, if any.
    pub sasl2: Option<Sasl2Feature>,
    /// RFC 6120 resource binding is offered.
    pub bind: bool,
    /// XEP-0198 is offered.
    pub stream_management: bool,
}

fn mechanism_names(elem: &Element, ns: &str) -> Vec<String> {
    elem.children()
        .filter(|child| child.is("mechanism", ns))
        .map(|child| child.text().trim().to_owned())
        .filter(|name| !name.is_empty())
        .collect()
}

impl StreamFeatures {
    /// Parse `<stream:features/>`.
    ///
    /// Unknown features are skipped.
    pub fn parse(elem: &Element) -> Result<Self, ProtocolError> {
        if !elem.is("features", ns::STREAM) {
            return Err(ProtocolError::MalformedElement(format!(
                "expected <stream:features/>, got <{}/>",
                elem.name()
            )));
        }
        let mut result = Self::default();
        for child in elem.children() {
            if child.is("starttls", ns::TLS) {
                result.starttls = Some(StartTlsFeature {
                    required: child.get_child("required", ns::TLS).is_some(),
                });
            } else if child.is("mechanisms", ns::SASL) {
                result.sasl_mechanisms = mechanism_names(child, ns::SASL);
            } else if child.is("authentication", ns::SASL2) {
                let mut sasl2 = Sasl2Feature {
                    mechanisms: mechanism_names(child, ns::SASL2),
                    ..Default::default()
                };
                if let Some(inline) = child.get_child("inline", ns::SASL2) {
                    sasl2.inline_sm = inline.get_child("sm", ns::SM).is_some();
                    sasl2.bind2 = inline.get_child("bind", ns::BIND2).map(|bind| Bind2Feature {
                        inline_features: bind
                            .get_child("inline", ns::BIND2)
                            .into_iter()
                            .flat_map(|inline| inline.children())
                            .filter(|feature| feature.is("feature", ns::BIND2))
                            .filter_map(|feature| feature.attr("var").map(str::to_owned))
                            .collect(),
                    });
                }
                result.sasl2 = Some(sasl2);
            } else if child.is("bind", ns::BIND) {
                result.bind = true;
            } else if child.is("sm", ns::SM) {
                result.stream_management = true;
            } else {
                log::trace!("ignoring stream feature {{{}}}{}", child.ns(), child.name());
            }
        }
        Ok(result)
    }

    /// Whether the peer insists on TLS.
    pub fn tls_required(&self) -> bool {
        self.starttls.map(|tls| tls.required).unwrap_or(false)
    }
}
