use regex::Regex;

pub fn validate_coordinates(latitude: f64, longitude: f64) -> bool {
    (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude)
}

pub fn validate_rating(rating: i32) -> bool {
    (1..=5).contains(&rating)
}

pub fn validate_image_url(url: &str) -> bool {
    let re = Regex::new(r"^https?://[^\s]+$").unwrap();
    re.is_match(url)
}

/// Short human-readable booking code, e.g. "BK-7F3K9Q".
pub fn generate_reference_code() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::thread_rng();
    let code: String = (0..6)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("BK-{}", code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_in_range() {
        assert!(validate_coordinates(21.1702, 72.8311));
        assert!(validate_coordinates(-90.0, 180.0));
        assert!(!validate_coordinates(91.0, 0.0));
        assert!(!validate_coordinates(0.0, -180.5));
    }

    #[test]
    fn rating_bounds() {
        assert!(validate_rating(1));
        assert!(validate_rating(5));
        assert!(!validate_rating(0));
        assert!(!validate_rating(6));
    }

    #[test]
    fn reference_code_shape() {
        let code = generate_reference_code();
        assert!(code.starts_with("BK-"));
        assert_eq!(code.len(), 9);
        // Ambiguous characters are excluded from the charset
        assert!(!code[3..].contains('O') && !code[3..].contains('0'));
    }
}
