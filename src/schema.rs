// Schema normalization - fixed alias table over noisy source headers
//
// The portal's files spell the same field half a dozen ways across years.
// Normalization is a fixed function (trim, upper-case, transliterate the
// accented letters that occur in these headers, strip spaces and periods);
// a finite alias table then maps known spellings to canonical field names.
// Anything the table does not know keeps its normalized spelling, and a
// missing required field is a typed SchemaError at the caller.

/// Canonical field names shared by ingestion and the registry load.
pub const COL_VALUE: &str = "ValorDespesas";
pub const COL_ACCOUNT: &str = "Conta";
pub const COL_REGISTRY_ID: &str = "RegistroANS";
pub const COL_DESCRIPTION: &str = "Descricao";
pub const COL_TAX_ID: &str = "CNPJ";
pub const COL_LEGAL_NAME: &str = "RazaoSocial";
pub const COL_MODALITY: &str = "Modalidade";
pub const COL_REGION: &str = "UF";

/// Upper-case, trim, transliterate Ç/Ã/Õ, replace spaces with underscores
/// and strip periods.
pub fn normalize_column(name: &str) -> String {
    name.trim()
        .to_uppercase()
        .replace('Ç', "C")
        .replace('Ã', "A")
        .replace('Õ', "O")
        .replace(' ', "_")
        .replace('.', "")
}

/// Map a normalized header to its canonical field name, when known.
pub fn canonical_column(normalized: &str) -> Option<&'static str> {
    match normalized {
        "VL_SALDO_FINAL" | "VALOR" => Some(COL_VALUE),
        "CD_CONTA_CONTABIL" => Some(COL_ACCOUNT),
        "REG_ANS" | "REGISTRO_ANS" => Some(COL_REGISTRY_ID),
        "DESCRICAO" => Some(COL_DESCRIPTION),
        "CNPJ" => Some(COL_TAX_ID),
        "RAZAO_SOCIAL" | "RAZAO" => Some(COL_LEGAL_NAME),
        "MODALIDADE" => Some(COL_MODALITY),
        "UF" => Some(COL_REGION),
        _ => None,
    }
}

/// Normalize and alias a raw header row.
pub fn canonicalize_headers(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|h| {
            let normalized = normalize_column(h);
            canonical_column(&normalized)
                .map(str::to_string)
                .unwrap_or(normalized)
        })
        .collect()
}

/// Index of a canonical column within a canonicalized header row.
pub fn find_column(headers: &[String], canonical: &str) -> Option<usize> {
    headers.iter().position(|h| h == canonical)
}
