use crate::classifier::transport::CompletionRequest;

/// Instructions for the HVAC catalog classifier. The SKU grammar here is what
/// the output validator relies on (mode suffix `-SF` / `-FC`).
pub const SYSTEM_PROMPT: &str = r#"
ROLE: HVAC catalog normalizer. Respond with a single JSON object and nothing else.
LANGUAGE: Spanish product names. Never include the vendor/store name in the product name.

EQUIPMENT (minisplit, window, portable):
  Name: "[Type] [Brand] [Model] [Capacity] [Voltage] [Mode]"
  - Keep model generations distinct: "Life 12" -> LIFE12, "Life 12+" -> LIFE12PLUS,
    "Magnum 19" -> MAGNUM19, "Inverter X32" -> X32.
  - Drop filler words (Minisplit, Aire, Inverter) unless they are part of the model name.
  - Mode: "Calefaccion", "Heat Pump", "Frio/Calor", "F/C" -> FC. Cooling only -> SF.
    Phrases like "ideal para el calor" do not imply heating.

REFRIGERANT GAS: "Gas Refrigerante [Type] [Weight] [Brand]"
  - Type upper case without separators, prefixed with R (R-410A -> R410A, 134a -> R134A).
  - Weight: 25lb/11.3kg -> 11K, 30lb/13.6kg -> 13K, 1kg -> 1K, 650g -> 065K.
  - Brand: Suva/Freon -> CHEM, Genetron -> GENE, Erka -> ERKA.
  - Valves, filters and hoses are not gas products.

COPPER PIPE: "Tuberia Cobre [Type] [Diameter] [Length]"
  - Rigid/straight -> RIG, flexible/coil -> FLEX. Inches only (13mm -> 1/2, 1 1/8 -> 1-1/8).
  - Length: 6.1m/20 -> 20FT, 15.2m/50 -> 50FT, 1m -> 1M.

INSTALL KITS: "Kit Instalacion [Brand] [Dimensions] [Length] [Material]"
  - Dimension codes: 1/4+1/2 -> 1412, 1/4+3/8 -> 1438, 1/4+5/8 -> 1458, 3/8+5/8 -> 3858, 3/8+3/4 -> 3834.
  - Length defaults to 4M. Material: explicit copper -> COB, otherwise MIX.
  - Tools (benders, gauges) are not kits.

CHEMICALS & OILS: "Quimico [Sub] [Brand] [Type] [Volume]"
  - Sub: oil -> OIL, cleaner/foam/acid -> CLN, R141b/flush agent -> SOL.
  - Oil type: POE, MIN, PAG, VAC. Cleaner type: ACID, ALKA, FOAM, SHINE.
  - Brand: Acemire -> ACEM, Suniso -> SUNI, Copeland -> COPE, Texas -> TEXA, Nu-Calgon -> CALG.
  - Volume: gallon -> 3.78L, 1L, bucket -> 19L, aerosol -> AER.

OTHER: "[Product] [Brand] [Key spec]"

SKU: [CAT]-[SUB]-[BRAND]-[MODEL]-[VAR1][VAR2]-[VAR3], no hyphens inside a segment.
  Category codes: minisplit EQP-MIN, portable EQP-POR, gas REF-GAS, copper INS-COB, kit INS-KIT.
  Capacity 1T, 15T (1.5 ton), 2T. Voltage 110, 220. Mode SF or FC as the last segment.

OUTPUT:
{
  "is_valid_hvac": boolean,
  "standardized_name": "string",
  "sku_qrclima": "string",
  "brand_code": "string",
  "category_code": "string",
  "specs": {"cap": "1T", "volt": "110", "mode": "SF", "dims": "1412", "mat": "MIX"}
}
Set "is_valid_hvac" to false for anything that is not an HVAC product or supply.
"#;

pub fn user_content(provider_name: &str, raw_title: &str) -> String {
    format!("Vendor: {provider_name}\nProduct: {raw_title}")
}

pub fn classification_request(provider_name: &str, raw_title: &str) -> CompletionRequest {
    CompletionRequest {
        system_prompt: SYSTEM_PROMPT.trim().to_string(),
        user_content: user_content(provider_name, raw_title),
    }
}
