// CNPJ check-digit validation (Modulo 11)
//
// Pure function over the 14-digit national tax identifier. Invalid ids are
// flagged downstream, never dropped: the totals must reflect every filing
// regardless of registry data quality.

const FIRST_WEIGHTS: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const SECOND_WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

/// True when `tax_id` is a well-formed CNPJ. Formatting characters are
/// ignored; a repeated single digit is rejected even when the arithmetic
/// happens to work out.
pub fn validate_cnpj(tax_id: &str) -> bool {
    let digits: Vec<u32> = tax_id.chars().filter_map(|c| c.to_digit(10)).collect();

    if digits.len() != 14 {
        return false;
    }
    if digits.iter().all(|&d| d == digits[0]) {
        return false;
    }

    check_digit(&digits[..12], &FIRST_WEIGHTS) == digits[12]
        && check_digit(&digits[..13], &SECOND_WEIGHTS) == digits[13]
}

/// Weighted sum mod 11; 11 - remainder, clamped to 0 when >= 10.
fn check_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    let digit = 11 - (sum % 11);
    if digit >= 10 {
        0
    } else {
        digit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_valid_cnpj() {
        assert!(validate_cnpj("11.444.777/0001-61"));
        assert!(validate_cnpj("11444777000161"));
    }

    #[test]
    fn test_all_same_digit_rejected() {
        // Trivially-repeated sequences are invalid by rule
        assert!(!validate_cnpj("11111111111111"));
        assert!(!validate_cnpj("00000000000000"));
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert!(!validate_cnpj(""));
        assert!(!validate_cnpj("1144477700016"));
        assert!(!validate_cnpj("114447770001611"));
        assert!(!validate_cnpj("N/A"));
    }

    #[test]
    fn test_wrong_check_digits_rejected() {
        assert!(!validate_cnpj("11444777000160"));
        assert!(!validate_cnpj("11444777000151"));
    }

    #[test]
    fn test_matches_reference_computation() {
        // Recompute the two digits independently for a valid id
        let digits: Vec<u32> = "11444777000161"
            .chars()
            .filter_map(|c| c.to_digit(10))
            .collect();
        assert_eq!(check_digit(&digits[..12], &FIRST_WEIGHTS), digits[12]);
        assert_eq!(check_digit(&digits[..13], &SECOND_WEIGHTS), digits[13]);
    }
}
