use std::collections::{BTreeMap, BTreeSet, HashMap};

use larder_config::BrandTableConfig;
use larder_core::{slugify, tokens};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod split;

use split::MultiWordPattern;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalBrand {
    pub brand_slug: String,
    pub display_name: String,
    pub aliases: BTreeSet<String>,
    pub known_lines: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Alias,
    SplitBrand,
    Unmapped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canonicalized {
    pub brand_slug: String,
    pub cleaned_product_name: String,
    pub resolution: Resolution,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CanonError {
    #[error("brand slug '{0}' is declared more than once")]
    DuplicateSlug(String),
    #[error("brand entry '{0}' normalizes to an empty slug")]
    EmptySlug(String),
    #[error("alias '{alias}' maps to both '{first}' and '{second}'")]
    AliasConflict {
        alias: String,
        first: String,
        second: String,
    },
    #[error("multi-word brand pattern '{0}' must contain at least two words")]
    PatternTooShort(String),
}

/// Resolves raw brand strings to canonical slugs using the alias table and the
/// multi-word pattern table. Both are immutable once built.
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    version: String,
    aliases: HashMap<String, String>,
    brands: BTreeMap<String, CanonicalBrand>,
    patterns: Vec<MultiWordPattern>,
}

impl Canonicalizer {
    pub fn new(table: &BrandTableConfig) -> Result<Self, CanonError> {
        let mut brands = BTreeMap::new();
        let mut aliases = HashMap::new();

        for entry in &table.brands {
            let brand_slug = slugify(&entry.slug);
            if brand_slug.is_empty() {
                return Err(CanonError::EmptySlug(entry.slug.clone()));
            }
            if brands.contains_key(&brand_slug) {
                return Err(CanonError::DuplicateSlug(brand_slug));
            }

            let mut brand_aliases = BTreeSet::new();
            for alias in entry
                .aliases
                .iter()
                .chain([&entry.slug, &entry.display_name])
            {
                let alias_key = slugify(alias);
                if alias_key.is_empty() {
                    continue;
                }
                insert_alias(&mut aliases, &alias_key, &brand_slug)?;
                brand_aliases.insert(alias_key);
            }

            brands.insert(
                brand_slug.clone(),
                CanonicalBrand {
                    brand_slug,
                    display_name: entry.display_name.trim().to_owned(),
                    aliases: brand_aliases,
                    known_lines: entry
                        .known_lines
                        .iter()
                        .map(|line| line.trim().to_owned())
                        .filter(|line| !line.is_empty())
                        .collect(),
                },
            );
        }

        let mut patterns = Vec::with_capacity(table.multi_word.len());
        for pattern in &table.multi_word {
            let words = tokens(&pattern.name);
            if words.len() < 2 {
                return Err(CanonError::PatternTooShort(pattern.name.clone()));
            }

            let brand_slug = pattern
                .slug
                .as_deref()
                .map(slugify)
                .filter(|slug| !slug.is_empty())
                .unwrap_or_else(|| words.join("_"));

            // The full name is itself a valid spelling of the brand.
            insert_alias(&mut aliases, &words.join("_"), &brand_slug)?;
            patterns.push(MultiWordPattern::new(words, brand_slug));
        }
        split::sort_patterns(&mut patterns);

        Ok(Self {
            version: table.version.clone(),
            aliases,
            brands,
            patterns,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn brand(&self, brand_slug: &str) -> Option<&CanonicalBrand> {
        self.brands.get(brand_slug)
    }

    pub fn brands(&self) -> impl Iterator<Item = &CanonicalBrand> {
        self.brands.values()
    }

    pub fn lookup_alias(&self, raw: &str) -> Option<&str> {
        self.aliases.get(&slugify(raw)).map(String::as_str)
    }

    /// Never fails: unknown brands pass through as their own normalized slug and
    /// the product name is returned untouched.
    pub fn canonicalize(&self, brand_raw: &str, product_name_raw: &str) -> Canonicalized {
        let candidate_slug = slugify(brand_raw);

        if let Some(brand_slug) = self.aliases.get(&candidate_slug) {
            return Canonicalized {
                brand_slug: brand_slug.clone(),
                cleaned_product_name: product_name_raw.trim().to_owned(),
                resolution: Resolution::Alias,
            };
        }

        if let Some(repair) = split::detect(&self.patterns, brand_raw, product_name_raw) {
            return Canonicalized {
                brand_slug: repair.brand_slug,
                cleaned_product_name: repair.cleaned_product_name,
                resolution: Resolution::SplitBrand,
            };
        }

        Canonicalized {
            brand_slug: candidate_slug,
            cleaned_product_name: product_name_raw.to_owned(),
            resolution: Resolution::Unmapped,
        }
    }

    /// Normalized product name with the brand's own words removed from the front,
    /// joined by underscores. Empty when nothing but the brand remains.
    pub fn name_slug(&self, brand_slug: &str, cleaned_product_name: &str) -> String {
        let words = tokens(cleaned_product_name);
        let brand_words = self.brand_prefixes(brand_slug);

        let stripped = brand_words
            .iter()
            .filter(|prefix| !prefix.is_empty() && words.starts_with(prefix))
            .map(|prefix| prefix.len())
            .max()
            .unwrap_or(0);

        words[stripped..].join("_")
    }

    fn brand_prefixes(&self, brand_slug: &str) -> Vec<Vec<String>> {
        let mut prefixes = vec![
            brand_slug
                .split('_')
                .filter(|word| !word.is_empty())
                .map(str::to_owned)
                .collect::<Vec<_>>(),
        ];
        if let Some(brand) = self.brands.get(brand_slug) {
            prefixes.push(tokens(&brand.display_name));
        }
        prefixes
    }
}

fn insert_alias(
    aliases: &mut HashMap<String, String>,
    alias: &str,
    brand_slug: &str,
) -> Result<(), CanonError> {
    match aliases.get(alias) {
        Some(existing) if existing != brand_slug => Err(CanonError::AliasConflict {
            alias: alias.to_owned(),
            first: existing.clone(),
            second: brand_slug.to_owned(),
        }),
        Some(_) => Ok(()),
        None => {
            aliases.insert(alias.to_owned(), brand_slug.to_owned());
            Ok(())
        }
    }
}
