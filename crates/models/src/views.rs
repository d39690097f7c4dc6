use crate::document::{list_field, str_field, Document};
use crate::fields;

/// Read-only view of a CTS CPH-holding document, exposing exactly the
/// fields the cleanse rules consume.
pub struct CtsCphHoldingView<'d>(pub &'d Document);

impl<'d> CtsCphHoldingView<'d> {
    pub fn lid_full_identifier(&self) -> &str {
        str_field(self.0, fields::LID_FULL_IDENTIFIER)
    }

    pub fn location_name(&self) -> &str {
        str_field(self.0, fields::ADR_NAME)
    }

    pub fn emails(&self) -> Vec<String> {
        list_field(self.0, fields::ADR_EMAIL_ADDRESS)
    }

    pub fn phones(&self) -> Vec<String> {
        list_field(self.0, fields::ADR_TELEPHONE_NUMBER)
    }
}

/// Read-only view of a SAM CPH-holding document.
pub struct SamCphHoldingView<'d>(pub &'d Document);

impl<'d> SamCphHoldingView<'d> {
    pub fn cph(&self) -> &str {
        str_field(self.0, fields::CPH)
    }

    pub fn species_code(&self) -> &str {
        str_field(self.0, fields::ANIMAL_SPECIES_CODE)
    }

    pub fn feature_name(&self) -> &str {
        str_field(self.0, fields::FEATURE_NAME)
    }

    pub fn emails(&self) -> Vec<String> {
        list_field(self.0, fields::EMAIL_ADDRESS)
    }

    pub fn phones(&self) -> Vec<String> {
        list_field(self.0, fields::TELEPHONE_NUMBER)
    }

    pub fn fsa(&self) -> &str {
        str_field(self.0, fields::FSA)
    }

    pub fn is_cattle_unit(&self) -> bool {
        self.species_code() == fields::SPECIES_CATTLE
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn sam_view_reads_fields_and_species() {
        let doc: Document = [
            (fields::CPH.to_string(), json!("12/345/6001")),
            (fields::ANIMAL_SPECIES_CODE.to_string(), json!("CTT")),
            (fields::EMAIL_ADDRESS.to_string(), json!("a@x.com; b@x.com")),
        ]
        .into_iter()
        .collect();

        let view = SamCphHoldingView(&doc);
        assert_eq!(view.cph(), "12/345/6001");
        assert!(view.is_cattle_unit());
        assert_eq!(view.emails(), vec!["a@x.com", "b@x.com"]);
        assert_eq!(view.feature_name(), "");
        assert!(view.phones().is_empty());
    }
}
