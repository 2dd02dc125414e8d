//! Surface forms for every entity the pattern extractor recognises.
//!
//! Latin surfaces match on ASCII word boundaries, case-insensitively.
//! Native (Hangul/Han) surfaces match whole tokens; multi-syllable Hangul
//! surfaces may carry a trailing particle.

use crate::entity::EntityType;

/// One lexicon entry.
#[derive(Debug, Clone, Copy)]
pub struct LexiconEntry {
    pub entity_type: EntityType,
    pub normalized: &'static str,
    pub latin: &'static [&'static str],
    pub native: &'static [&'static str],
}

type Table = &'static [(&'static str, &'static [&'static str], &'static [&'static str])];

const PLANETS: Table = &[
    ("sun", &["sun"], &["태양"]),
    ("moon", &["moon"], &["달"]),
    ("mercury", &["mercury"], &["수성"]),
    ("venus", &["venus"], &["금성"]),
    ("mars", &["mars"], &["화성"]),
    ("jupiter", &["jupiter"], &["목성"]),
    ("saturn", &["saturn"], &["토성"]),
    ("uranus", &["uranus"], &["천왕성"]),
    ("neptune", &["neptune"], &["해왕성"]),
    ("pluto", &["pluto"], &["명왕성"]),
];

const SIGNS: Table = &[
    ("aries", &["aries"], &["양자리", "백양궁"]),
    ("taurus", &["taurus"], &["황소자리", "금우궁"]),
    ("gemini", &["gemini"], &["쌍둥이자리", "쌍자궁"]),
    ("cancer", &["cancer"], &["게자리", "거해궁"]),
    ("leo", &["leo"], &["사자자리", "사자궁"]),
    ("virgo", &["virgo"], &["처녀자리", "처녀궁"]),
    ("libra", &["libra"], &["천칭자리", "천칭궁"]),
    ("scorpio", &["scorpio"], &["전갈자리", "천갈궁"]),
    ("sagittarius", &["sagittarius"], &["사수자리", "궁수자리", "인마궁"]),
    ("capricorn", &["capricorn"], &["염소자리", "마갈궁"]),
    ("aquarius", &["aquarius"], &["물병자리", "보병궁"]),
    ("pisces", &["pisces"], &["물고기자리", "쌍어궁"]),
];

const ASPECTS: Table = &[
    ("conjunction", &["conjunction", "conjunct", "conjuncts"], &["컨정션"]),
    ("opposition", &["opposition", "opposes", "opposite"], &["오포지션"]),
    ("square", &["square", "squares"], &["스퀘어"]),
    ("trine", &["trine", "trines"], &["트라인"]),
    ("sextile", &["sextile", "sextiles"], &["섹스타일"]),
    ("quincunx", &["quincunx", "inconjunct"], &["퀸컹스"]),
];

const ELEMENTS: Table = &[
    ("wood", &["wood"], &["나무", "목기", "木"]),
    ("fire", &["fire"], &["불", "화기", "火"]),
    ("earth", &["earth"], &["흙", "토기", "土"]),
    ("metal", &["metal"], &["쇠", "금기", "金"]),
    ("water", &["water"], &["물", "수기", "水"]),
];

const TEN_GODS: Table = &[
    ("비견", &["friend star", "parallel"], &["비견", "比肩"]),
    ("겁재", &["rob wealth"], &["겁재", "劫財"]),
    ("식신", &["eating god"], &["식신", "食神"]),
    ("상관", &["hurting officer"], &["상관", "傷官"]),
    ("편재", &["indirect wealth"], &["편재", "偏財"]),
    ("정재", &["direct wealth"], &["정재", "正財"]),
    ("편관", &["seven killings", "indirect officer"], &["편관", "칠살", "偏官"]),
    ("정관", &["direct officer"], &["정관", "正官"]),
    ("편인", &["indirect resource"], &["편인", "偏印"]),
    ("정인", &["direct resource"], &["정인", "正印"]),
];

const SHINSAL: Table = &[
    ("도화살", &["peach blossom"], &["도화살", "도화", "桃花"]),
    ("역마살", &["traveling horse", "travelling horse"], &["역마살", "역마", "驛馬"]),
    ("화개살", &["flower canopy"], &["화개살", "화개", "華蓋"]),
    ("백호살", &["white tiger"], &["백호살", "백호"]),
    ("괴강살", &["kuei kang"], &["괴강살", "괴강"]),
    ("양인살", &["goat blade", "yang blade"], &["양인살", "양인"]),
    ("홍염살", &["red flame"], &["홍염살", "홍염"]),
    ("천을귀인", &["nobleman"], &["천을귀인", "귀인"]),
];

const TAROT: Table = &[
    ("the_fool", &["the fool", "fool card"], &["바보카드"]),
    ("the_magician", &["the magician", "magician"], &["마법사"]),
    ("the_high_priestess", &["high priestess"], &["여사제"]),
    ("the_empress", &["empress"], &["여황제"]),
    ("the_emperor", &["emperor"], &["황제"]),
    ("the_hierophant", &["hierophant"], &["교황"]),
    ("the_lovers", &["the lovers", "lovers card"], &["연인카드"]),
    ("the_chariot", &["chariot"], &["전차"]),
    ("strength", &["strength card"], &["힘카드"]),
    ("the_hermit", &["hermit"], &["은둔자"]),
    ("wheel_of_fortune", &["wheel of fortune"], &["수레바퀴"]),
    ("justice", &["justice card"], &["정의카드"]),
    ("the_hanged_man", &["hanged man"], &["매달린사람"]),
    ("death", &["death card"], &["죽음카드"]),
    ("temperance", &["temperance"], &["절제카드"]),
    ("the_devil", &["the devil", "devil card"], &["악마카드"]),
    ("the_tower", &["the tower", "tower card"], &["탑카드"]),
    ("the_star", &["the star card", "star card"], &["별카드"]),
    ("the_moon", &["the moon card", "moon card"], &["달카드"]),
    ("the_sun", &["the sun card", "sun card"], &["태양카드"]),
    ("judgement", &["judgement", "judgment"], &["심판"]),
    ("the_world", &["the world card", "world card"], &["세계카드"]),
];

/// Heavenly stems: Hangul, Hanja, element.
pub const STEMS: [(&str, &str, &str); 10] = [
    ("갑", "甲", "wood"),
    ("을", "乙", "wood"),
    ("병", "丙", "fire"),
    ("정", "丁", "fire"),
    ("무", "戊", "earth"),
    ("기", "己", "earth"),
    ("경", "庚", "metal"),
    ("신", "辛", "metal"),
    ("임", "壬", "water"),
    ("계", "癸", "water"),
];

/// Earthly branches: Hangul, Hanja, element.
pub const BRANCHES: [(&str, &str, &str); 12] = [
    ("자", "子", "water"),
    ("축", "丑", "earth"),
    ("인", "寅", "wood"),
    ("묘", "卯", "wood"),
    ("진", "辰", "earth"),
    ("사", "巳", "fire"),
    ("오", "午", "fire"),
    ("미", "未", "earth"),
    ("신", "申", "metal"),
    ("유", "酉", "metal"),
    ("술", "戌", "earth"),
    ("해", "亥", "water"),
];

/// Hangul element syllables used in stem compounds (갑목, 병화).
pub const ELEMENT_SYLLABLES: [(&str, &str, &str); 5] = [
    ("목", "木", "wood"),
    ("화", "火", "fire"),
    ("토", "土", "earth"),
    ("금", "金", "metal"),
    ("수", "水", "water"),
];

/// Element generation cycle: each element feeds the next.
const GENERATES: [(&str, &str); 5] = [
    ("wood", "fire"),
    ("fire", "earth"),
    ("earth", "metal"),
    ("metal", "water"),
    ("water", "wood"),
];

/// Element control cycle.
const CONTROLS: [(&str, &str); 5] = [
    ("wood", "earth"),
    ("earth", "water"),
    ("water", "fire"),
    ("fire", "metal"),
    ("metal", "wood"),
];

/// Every table-driven entry.
pub fn entries() -> Vec<LexiconEntry> {
    let tables: [(EntityType, Table); 7] = [
        (EntityType::Planet, PLANETS),
        (EntityType::Sign, SIGNS),
        (EntityType::Aspect, ASPECTS),
        (EntityType::Element, ELEMENTS),
        (EntityType::TenGod, TEN_GODS),
        (EntityType::Shinsal, SHINSAL),
        (EntityType::Tarot, TAROT),
    ];
    tables
        .into_iter()
        .flat_map(|(entity_type, table)| {
            table.iter().map(move |&(normalized, latin, native)| LexiconEntry {
                entity_type,
                normalized,
                latin,
                native,
            })
        })
        .collect()
}

/// Element of a stem or branch (Hangul or Hanja).
pub fn element_of(entity_type: EntityType, normalized: &str) -> Option<&'static str> {
    let table: &[(&str, &str, &str)] = match entity_type {
        EntityType::Stem => &STEMS,
        EntityType::Branch => &BRANCHES,
        EntityType::Element => {
            return ELEMENT_SYLLABLES
                .iter()
                .map(|(_, _, e)| *e)
                .find(|e| *e == normalized);
        }
        _ => return None,
    };
    table
        .iter()
        .find(|(hangul, hanja, _)| *hangul == normalized || *hanja == normalized)
        .map(|(_, _, element)| *element)
}

/// Whether element `a` generates element `b`.
pub fn generates(a: &str, b: &str) -> bool {
    GENERATES.iter().any(|&(x, y)| x == a && y == b)
}

/// Whether element `a` controls element `b`.
pub fn controls(a: &str, b: &str) -> bool {
    CONTROLS.iter().any(|&(x, y)| x == a && y == b)
}

/// Latin surfaces of one type, longest first, for alternation patterns.
pub fn latin_surfaces(entity_type: EntityType) -> Vec<(&'static str, &'static str)> {
    let mut surfaces: Vec<(&str, &str)> = entries()
        .into_iter()
        .filter(|e| e.entity_type == entity_type)
        .flat_map(|e| e.latin.iter().map(move |s| (*s, e.normalized)))
        .collect();
    surfaces.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));
    surfaces
}
