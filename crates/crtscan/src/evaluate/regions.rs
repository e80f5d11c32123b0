//! First-level subdivisions for the countries whose
//! `stateOrProvinceName` values can be checked.

/// `(code, name)` pairs. Codes are the ISO 3166-2 suffixes.
type Subdivisions = &'static [(&'static str, &'static str)];

const US: Subdivisions = &[
    ("AL", "Alabama"),
    ("AK", "Alaska"),
    ("AZ", "Arizona"),
    ("AR", "Arkansas"),
    ("CA", "California"),
    ("CO", "Colorado"),
    ("CT", "Connecticut"),
    ("DE", "Delaware"),
    ("FL", "Florida"),
    ("GA", "Georgia"),
    ("HI", "Hawaii"),
    ("ID", "Idaho"),
    ("IL", "Illinois"),
    ("IN", "Indiana"),
    ("IA", "Iowa"),
    ("KS", "Kansas"),
    ("KY", "Kentucky"),
    ("LA", "Louisiana"),
    ("ME", "Maine"),
    ("MD", "Maryland"),
    ("MA", "Massachusetts"),
    ("MI", "Michigan"),
    ("MN", "Minnesota"),
    ("MS", "Mississippi"),
    ("MO", "Missouri"),
    ("MT", "Montana"),
    ("NE", "Nebraska"),
    ("NV", "Nevada"),
    ("NH", "New Hampshire"),
    ("NJ", "New Jersey"),
    ("NM", "New Mexico"),
    ("NY", "New York"),
    ("NC", "North Carolina"),
    ("ND", "North Dakota"),
    ("OH", "Ohio"),
    ("OK", "Oklahoma"),
    ("OR", "Oregon"),
    ("PA", "Pennsylvania"),
    ("RI", "Rhode Island"),
    ("SC", "South Carolina"),
    ("SD", "South Dakota"),
    ("TN", "Tennessee"),
    ("TX", "Texas"),
    ("UT", "Utah"),
    ("VT", "Vermont"),
    ("VA", "Virginia"),
    ("WA", "Washington"),
    ("WV", "West Virginia"),
    ("WI", "Wisconsin"),
    ("WY", "Wyoming"),
    ("DC", "District of Columbia"),
    ("AS", "American Samoa"),
    ("GU", "Guam"),
    ("MP", "Northern Mariana Islands"),
    ("PR", "Puerto Rico"),
    ("UM", "United States Minor Outlying Islands"),
    ("VI", "Virgin Islands"),
];

const CA: Subdivisions = &[
    ("AB", "Alberta"),
    ("BC", "British Columbia"),
    ("MB", "Manitoba"),
    ("NB", "New Brunswick"),
    ("NL", "Newfoundland and Labrador"),
    ("NS", "Nova Scotia"),
    ("NT", "Northwest Territories"),
    ("NU", "Nunavut"),
    ("ON", "Ontario"),
    ("PE", "Prince Edward Island"),
    ("QC", "Quebec"),
    ("QC", "Québec"),
    ("SK", "Saskatchewan"),
    ("YT", "Yukon"),
];

const AU: Subdivisions = &[
    ("ACT", "Australian Capital Territory"),
    ("NSW", "New South Wales"),
    ("NT", "Northern Territory"),
    ("QLD", "Queensland"),
    ("SA", "South Australia"),
    ("TAS", "Tasmania"),
    ("VIC", "Victoria"),
    ("WA", "Western Australia"),
];

const DE: Subdivisions = &[
    ("BW", "Baden-Württemberg"),
    ("BY", "Bayern"),
    ("BY", "Bavaria"),
    ("BE", "Berlin"),
    ("BB", "Brandenburg"),
    ("HB", "Bremen"),
    ("HH", "Hamburg"),
    ("HE", "Hessen"),
    ("HE", "Hesse"),
    ("MV", "Mecklenburg-Vorpommern"),
    ("NI", "Niedersachsen"),
    ("NI", "Lower Saxony"),
    ("NW", "Nordrhein-Westfalen"),
    ("NW", "North Rhine-Westphalia"),
    ("RP", "Rheinland-Pfalz"),
    ("SL", "Saarland"),
    ("SN", "Sachsen"),
    ("SN", "Saxony"),
    ("ST", "Sachsen-Anhalt"),
    ("SH", "Schleswig-Holstein"),
    ("TH", "Thüringen"),
    ("TH", "Thuringia"),
];

/// Subdivision table for a country, if one is known.
fn subdivisions(country: &str) -> Option<Subdivisions> {
    match country.trim().to_ascii_uppercase().as_str() {
        "US" => Some(US),
        "CA" => Some(CA),
        "AU" => Some(AU),
        "DE" => Some(DE),
        _ => None,
    }
}

/// Check a province value against the country's subdivisions.
///
/// `None` when the country has no table. Matching is case-insensitive on
/// both the code and the full name.
pub fn is_known_subdivision(country: &str, province: &str) -> Option<bool> {
    let table = subdivisions(country)?;
    let needle = province.trim().to_lowercase();
    Some(table.iter().any(|(code, name)| {
        code.to_lowercase() == needle || name.to_lowercase() == needle
    }))
}

/// Country codes that ISO 3166 reserves for user assignment.
pub fn is_user_assigned_country(code: &str) -> bool {
    let bytes = code.as_bytes();
    if bytes.len() != 2 {
        return false;
    }
    matches!(
        (bytes[0], bytes[1]),
        (b'A', b'A') | (b'Q', b'M'..=b'Z') | (b'X', b'A'..=b'Z') | (b'Z', b'Z')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_subdivisions_by_code_and_name() {
        assert_eq!(is_known_subdivision("US", "California"), Some(true));
        assert_eq!(is_known_subdivision("us", "ca"), Some(true));
        assert_eq!(is_known_subdivision("CA", "Québec"), Some(true));
        assert_eq!(is_known_subdivision("AU", " victoria "), Some(true));
        assert_eq!(is_known_subdivision("DE", "Bavaria"), Some(true));
        assert_eq!(is_known_subdivision("DE", "THÜRINGEN"), Some(true));
    }

    #[test]
    fn test_unknown_subdivision() {
        assert_eq!(is_known_subdivision("US", "Narnia"), Some(false));
        assert_eq!(is_known_subdivision("AU", "Queensland, Australia"), Some(false));
    }

    #[test]
    fn test_country_without_table() {
        assert_eq!(is_known_subdivision("FR", "Bretagne"), None);
        assert_eq!(is_known_subdivision("", "California"), None);
    }

    #[test]
    fn test_user_assigned_codes() {
        for code in ["AA", "QM", "QZ", "XA", "XK", "ZZ"] {
            assert!(is_user_assigned_country(code), "{code}");
        }
        for code in ["US", "QA", "ZA", "X", "XXX"] {
            assert!(!is_user_assigned_country(code), "{code}");
        }
    }
}
