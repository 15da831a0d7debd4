//! SMILES tokenization and hashed path fingerprints.

use molmia_core::{Encoder, FeatureVector, FingerprintConfig, MiaError, Result};

/// A lexical SMILES token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    /// An atom, bracketed or from the organic subset (`C`, `Cl`, `c`, `[NH4+]`).
    Atom(String),
    /// A bond symbol (`-`, `=`, `#`, `$`, `:`, `/`, `\`).
    Bond(char),
    /// Opening parenthesis.
    BranchOpen,
    /// Closing parenthesis.
    BranchClose,
    /// Ring-closure label.
    Ring(u32),
    /// Disconnected-component separator.
    Dot,
}

const ORGANIC_TWO: [&str; 2] = ["Cl", "Br"];
const ORGANIC_ONE: &str = "BCNOPSFI";
const AROMATIC: &str = "bcnops";
const BONDS: &str = "-=#$:/\\";

/// Split a SMILES string into tokens, validating brackets, branches and ring closures.
pub fn tokenize_smiles(smiles: &str) -> Result<Vec<Token>> {
    let invalid = |reason: String| MiaError::invalid_molecule(smiles, reason);
    let s = smiles.trim();
    if s.is_empty() {
        return Err(invalid("empty structure".into()));
    }

    let chars: Vec<char> = s.chars().collect();
    let mut tokens = Vec::with_capacity(chars.len());
    let mut depth = 0usize;
    let mut open_rings: Vec<u32> = Vec::new();
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '[' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == ']')
                    .ok_or_else(|| invalid(format!("unclosed bracket atom at {i}")))?;
                let inner: String = chars[i + 1..i + 1 + close].iter().collect();
                if inner.is_empty() || inner.contains('[') {
                    return Err(invalid(format!("malformed bracket atom at {i}")));
                }
                tokens.push(Token::Atom(format!("[{inner}]")));
                i += close + 2;
                continue;
            }
            ']' => return Err(invalid(format!("unexpected ']' at {i}"))),
            '(' => {
                depth += 1;
                tokens.push(Token::BranchOpen);
            }
            ')' => {
                if depth == 0 {
                    return Err(invalid(format!("unbalanced ')' at {i}")));
                }
                depth -= 1;
                tokens.push(Token::BranchClose);
            }
            '.' => tokens.push(Token::Dot),
            '%' => {
                let digits: String = chars[i + 1..].iter().take(2).collect();
                if digits.len() != 2 || !digits.chars().all(|d| d.is_ascii_digit()) {
                    return Err(invalid(format!("malformed ring label at {i}")));
                }
                let label = digits.parse::<u32>().map_err(|e| invalid(e.to_string()))?;
                toggle_ring(&mut open_rings, label);
                tokens.push(Token::Ring(label));
                i += 3;
                continue;
            }
            d if d.is_ascii_digit() => {
                let label = d.to_digit(10).unwrap_or_default();
                toggle_ring(&mut open_rings, label);
                tokens.push(Token::Ring(label));
            }
            b if BONDS.contains(b) => tokens.push(Token::Bond(b)),
            _ => {
                let two: String = chars[i..chars.len().min(i + 2)].iter().collect();
                if ORGANIC_TWO.contains(&two.as_str()) {
                    tokens.push(Token::Atom(two));
                    i += 2;
                    continue;
                }
                if ORGANIC_ONE.contains(c) || AROMATIC.contains(c) {
                    tokens.push(Token::Atom(c.to_string()));
                } else {
                    return Err(invalid(format!("unexpected character '{c}' at {i}")));
                }
            }
        }
        i += 1;
    }

    if depth != 0 {
        return Err(invalid("unclosed branch".into()));
    }
    if let Some(label) = open_rings.first() {
        return Err(invalid(format!("unclosed ring {label}")));
    }
    if !tokens.iter().any(|t| matches!(t, Token::Atom(_))) {
        return Err(invalid("no atoms".into()));
    }
    Ok(tokens)
}

fn toggle_ring(open: &mut Vec<u32>, label: u32) {
    if let Some(pos) = open.iter().position(|&l| l == label) {
        open.remove(pos);
    } else {
        open.push(label);
    }
}

/// Fixed-width bit fingerprint.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    words: Vec<u64>,
    n_bits: usize,
}

impl Fingerprint {
    /// All-zero fingerprint of the given width.
    pub fn zeros(n_bits: usize) -> Self {
        Self {
            words: vec![0; n_bits.div_ceil(64)],
            n_bits,
        }
    }

    /// Width in bits.
    pub fn n_bits(&self) -> usize {
        self.n_bits
    }

    /// Set a bit (taken modulo the width).
    pub fn set(&mut self, bit: usize) {
        let bit = bit % self.n_bits.max(1);
        self.words[bit / 64] |= 1u64 << (bit % 64);
    }

    /// Whether a bit is set.
    pub fn get(&self, bit: usize) -> bool {
        bit < self.n_bits && self.words[bit / 64] & (1u64 << (bit % 64)) != 0
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Expand to a 0/1 feature vector.
    pub fn to_features(&self) -> FeatureVector {
        FeatureVector::from_iter((0..self.n_bits).map(|b| if self.get(b) { 1.0 } else { 0.0 }))
    }
}

/// Tanimoto (Jaccard) similarity of two fingerprints.
///
/// Two empty fingerprints are identical (similarity 1).
pub fn tanimoto(a: &Fingerprint, b: &Fingerprint) -> f64 {
    debug_assert_eq!(a.n_bits, b.n_bits, "fingerprint widths differ");
    let mut inter = 0u32;
    let mut union = 0u32;
    for (x, y) in a.words.iter().zip(b.words.iter()) {
        inter += (x & y).count_ones();
        union += (x | y).count_ones();
    }
    if union == 0 {
        1.0
    } else {
        inter as f64 / union as f64
    }
}

/// Hash linear atom/bond paths of a SMILES string into a fingerprint.
///
/// Paths follow the written order of each component with branch tokens
/// elided and ring closures reduced to a generic marker, so this
/// approximates a topological path fingerprint without graph perception.
pub fn path_fingerprint(smiles: &str, config: &FingerprintConfig) -> Result<Fingerprint> {
    let tokens = tokenize_smiles(smiles)?;
    let mut fp = Fingerprint::zeros(config.n_bits);

    for component in tokens.split(|t| *t == Token::Dot) {
        let path: Vec<String> = component
            .iter()
            .filter_map(|t| match t {
                Token::Atom(a) => Some(a.clone()),
                Token::Bond(b) => Some(b.to_string()),
                Token::Ring(_) => Some("%".to_owned()),
                _ => None,
            })
            .collect();
        for start in 0..path.len() {
            for len in 1..=config.max_path_len {
                let end = start + len;
                if end > path.len() {
                    break;
                }
                let forward = &path[start..end];
                let backward: Vec<String> = forward.iter().rev().cloned().collect();
                // Paths are undirected: hash the lexicographically smaller direction.
                let canonical = if backward.as_slice() < forward {
                    backward.as_slice()
                } else {
                    forward
                };
                fp.set(fnv1a(canonical) as usize);
            }
        }
    }
    Ok(fp)
}

fn fnv1a(parts: &[String]) -> u64 {
    let mut h: u64 = 0xCBF2_9CE4_8422_2325;
    for part in parts {
        for b in part.bytes().chain(std::iter::once(0x1F)) {
            h ^= b as u64;
            h = h.wrapping_mul(0x0000_0100_0000_01B3);
        }
    }
    h
}

/// Encoder emitting path-fingerprint bits as features.
#[derive(Clone, Debug, Default)]
pub struct FingerprintEncoder {
    /// Fingerprint parameters.
    pub config: FingerprintConfig,
}

impl FingerprintEncoder {
    /// Create an encoder with the given fingerprint parameters.
    pub fn new(config: FingerprintConfig) -> Self {
        Self { config }
    }
}

impl Encoder for FingerprintEncoder {
    fn encode(&self, structure: &str) -> Result<FeatureVector> {
        Ok(path_fingerprint(structure, &self.config)?.to_features())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_common_smiles() {
        let tokens = tokenize_smiles("CC(=O)Oc1ccccc1C(=O)O").unwrap();
        assert_eq!(tokens[0], Token::Atom("C".into()));
        assert!(tokens.contains(&Token::Ring(1)));
        assert!(tokens.contains(&Token::Bond('=')));

        let tokens = tokenize_smiles("[NH4+].[Cl-]").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Atom("[NH4+]".into()),
                Token::Dot,
                Token::Atom("[Cl-]".into())
            ]
        );

        let tokens = tokenize_smiles("ClCBr").unwrap();
        assert_eq!(tokens.len(), 3);
        assert!(tokenize_smiles("C%10CC%10").is_ok());
    }

    #[test]
    fn rejects_malformed_smiles() {
        for bad in ["", "C(C", "C)C", "c1ccccc", "[NH4", "CXC", "()"] {
            let err = tokenize_smiles(bad).unwrap_err();
            assert!(
                matches!(err, MiaError::InvalidMolecule { .. }),
                "{bad} should be invalid"
            );
        }
    }

    #[test]
    fn tanimoto_bounds() {
        let cfg = FingerprintConfig::default();
        let a = path_fingerprint("CCCCCCO", &cfg).unwrap();
        let b = path_fingerprint("CCCCCCN", &cfg).unwrap();
        let c = path_fingerprint("c1ccccc1Br", &cfg).unwrap();
        assert_eq!(tanimoto(&a, &a), 1.0);
        let ab = tanimoto(&a, &b);
        let ac = tanimoto(&a, &c);
        assert!(ab > ac);
        assert!((0.0..1.0).contains(&ab));
        let reversed = path_fingerprint("OCCCCCC", &cfg).unwrap();
        assert_eq!(tanimoto(&a, &reversed), 1.0);
        assert_eq!(tanimoto(&Fingerprint::zeros(64), &Fingerprint::zeros(64)), 1.0);
    }

    #[test]
    fn encoder_features_match_fingerprint() {
        let cfg = FingerprintConfig {
            max_path_len: 2,
            n_bits: 128,
        };
        let enc = FingerprintEncoder::new(cfg.clone());
        let feats = enc.encode("CCO").unwrap();
        let fp = path_fingerprint("CCO", &cfg).unwrap();
        assert_eq!(feats.len(), 128);
        assert_eq!(feats.sum() as u32, fp.count_ones());
        assert!(enc.encode("C(").is_err());
    }
}
