// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Protobuf messages persisted in segment files.
//!
//! The messages are declared with `prost` derives so that the crate builds
//! without `protoc`. Field tags are part of the on-disk format and must never
//! be reused.

pub mod segment {
    /// Location of a page inside a segment file.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PagePointerPb {
        #[prost(uint64, tag = "1")]
        pub offset: u64,
        #[prost(uint32, tag = "2")]
        pub size: u32,
    }

    /// Location of a segment footer embedded in a partial rowset.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct FooterPointerPb {
        #[prost(uint64, tag = "1")]
        pub position: u64,
        #[prost(uint32, tag = "2")]
        pub size: u32,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum FieldTypePb {
        Unknown = 0,
        Boolean = 1,
        TinyInt = 2,
        SmallInt = 3,
        Int = 4,
        BigInt = 5,
        LargeInt = 6,
        Float = 7,
        Double = 8,
        Decimal32 = 9,
        Decimal64 = 10,
        Decimal128 = 11,
        Date = 12,
        Datetime = 13,
        Char = 14,
        Varchar = 15,
        Array = 16,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum EncodingTypePb {
        UnknownEncoding = 0,
        DefaultEncoding = 1,
        PlainEncoding = 2,
        DictEncoding = 3,
        RleEncoding = 4,
        BitShuffle = 5,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum CompressionTypePb {
        UnknownCompression = 0,
        NoCompression = 1,
        Lz4 = 2,
        Zstd = 3,
        Snappy = 4,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum ColumnIndexTypePb {
        UnknownIndexType = 0,
        OrdinalIndex = 1,
        ZoneMapIndex = 2,
        BitmapIndex = 3,
        BloomFilterIndex = 4,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum PageTypePb {
        UnknownPageType = 0,
        DataPage = 1,
        IndexPage = 2,
        DictionaryPage = 3,
        ShortKeyPage = 4,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum HashStrategyPb {
        SipHash13 = 0,
    }

    /// Serialized min/max statistics of a page or a whole segment.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ZoneMapPb {
        #[prost(string, tag = "1")]
        pub min: ::prost::alloc::string::String,
        #[prost(string, tag = "2")]
        pub max: ::prost::alloc::string::String,
        #[prost(bool, tag = "3")]
        pub has_null: bool,
        #[prost(bool, tag = "4")]
        pub has_not_null: bool,
    }

    /// A single page holding `num_values` index entries.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct IndexedColumnMetaPb {
        #[prost(uint64, tag = "1")]
        pub num_values: u64,
        #[prost(message, optional, tag = "2")]
        pub page: ::core::option::Option<PagePointerPb>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct BTreeMetaPb {
        #[prost(message, optional, tag = "1")]
        pub root_page: ::core::option::Option<PagePointerPb>,
        #[prost(bool, tag = "2")]
        pub is_root_data_page: bool,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct OrdinalIndexPb {
        #[prost(message, optional, tag = "1")]
        pub root_page: ::core::option::Option<BTreeMetaPb>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ZoneMapIndexPb {
        #[prost(message, optional, tag = "1")]
        pub page_zone_maps: ::core::option::Option<IndexedColumnMetaPb>,
        #[prost(message, optional, tag = "2")]
        pub segment_zone_map: ::core::option::Option<ZoneMapPb>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct BitmapIndexPb {
        #[prost(message, optional, tag = "1")]
        pub dict_column: ::core::option::Option<IndexedColumnMetaPb>,
        #[prost(message, optional, tag = "2")]
        pub bitmap_column: ::core::option::Option<IndexedColumnMetaPb>,
        #[prost(bool, tag = "3")]
        pub has_null: bool,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct BloomFilterIndexPb {
        #[prost(enumeration = "HashStrategyPb", tag = "1")]
        pub hash_strategy: i32,
        #[prost(uint32, tag = "2")]
        pub num_hash_functions: u32,
        #[prost(message, optional, tag = "3")]
        pub bloom_filter: ::core::option::Option<IndexedColumnMetaPb>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ColumnIndexMetaPb {
        #[prost(enumeration = "ColumnIndexTypePb", tag = "1")]
        pub r#type: i32,
        #[prost(message, optional, tag = "7")]
        pub ordinal_index: ::core::option::Option<OrdinalIndexPb>,
        #[prost(message, optional, tag = "8")]
        pub zone_map_index: ::core::option::Option<ZoneMapIndexPb>,
        #[prost(message, optional, tag = "9")]
        pub bitmap_index: ::core::option::Option<BitmapIndexPb>,
        #[prost(message, optional, tag = "10")]
        pub bloom_filter_index: ::core::option::Option<BloomFilterIndexPb>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ColumnMetaPb {
        #[prost(uint32, tag = "1")]
        pub column_id: u32,
        #[prost(uint32, tag = "2")]
        pub unique_id: u32,
        #[prost(enumeration = "FieldTypePb", tag = "3")]
        pub r#type: i32,
        #[prost(int32, tag = "4")]
        pub length: i32,
        #[prost(enumeration = "EncodingTypePb", tag = "5")]
        pub encoding: i32,
        #[prost(enumeration = "CompressionTypePb", tag = "6")]
        pub compression: i32,
        #[prost(bool, tag = "7")]
        pub is_nullable: bool,
        #[prost(message, repeated, tag = "8")]
        pub indexes: ::prost::alloc::vec::Vec<ColumnIndexMetaPb>,
        #[prost(message, optional, tag = "9")]
        pub dict_page: ::core::option::Option<PagePointerPb>,
        #[prost(uint64, tag = "10")]
        pub num_rows: u64,
        #[prost(message, repeated, tag = "11")]
        pub children_columns: ::prost::alloc::vec::Vec<ColumnMetaPb>,
        #[prost(uint64, tag = "12")]
        pub total_mem_footprint: u64,
        #[prost(int32, tag = "13")]
        pub precision: i32,
        #[prost(int32, tag = "14")]
        pub scale: i32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SegmentFooterPb {
        #[prost(uint32, tag = "1")]
        pub version: u32,
        #[prost(message, repeated, tag = "2")]
        pub columns: ::prost::alloc::vec::Vec<ColumnMetaPb>,
        #[prost(uint32, tag = "3")]
        pub num_rows: u32,
        #[prost(uint64, tag = "4")]
        pub index_footprint: u64,
        #[prost(uint64, tag = "5")]
        pub data_footprint: u64,
        #[prost(uint64, tag = "6")]
        pub raw_data_footprint: u64,
        #[prost(message, optional, tag = "9")]
        pub short_key_index_page: ::core::option::Option<PagePointerPb>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct DataPageFooterPb {
        #[prost(uint64, tag = "1")]
        pub first_ordinal: u64,
        #[prost(uint64, tag = "2")]
        pub num_values: u64,
        #[prost(uint32, tag = "3")]
        pub nullmap_size: u32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct IndexPageFooterPb {
        #[prost(uint32, tag = "1")]
        pub num_entries: u32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct DictPageFooterPb {
        #[prost(enumeration = "EncodingTypePb", tag = "1")]
        pub encoding: i32,
        #[prost(uint32, tag = "2")]
        pub num_values: u32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ShortKeyFooterPb {
        #[prost(uint32, tag = "1")]
        pub num_items: u32,
        #[prost(uint32, tag = "2")]
        pub key_bytes: u32,
        #[prost(uint32, tag = "3")]
        pub offset_bytes: u32,
        #[prost(uint32, tag = "4")]
        pub segment_id: u32,
        #[prost(uint32, tag = "5")]
        pub num_rows_per_block: u32,
        #[prost(uint32, tag = "6")]
        pub num_segment_rows: u32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PageFooterPb {
        #[prost(enumeration = "PageTypePb", tag = "1")]
        pub r#type: i32,
        #[prost(uint32, tag = "2")]
        pub uncompressed_size: u32,
        #[prost(message, optional, tag = "7")]
        pub data_page_footer: ::core::option::Option<DataPageFooterPb>,
        #[prost(message, optional, tag = "8")]
        pub index_page_footer: ::core::option::Option<IndexPageFooterPb>,
        #[prost(message, optional, tag = "9")]
        pub dict_page_footer: ::core::option::Option<DictPageFooterPb>,
        #[prost(message, optional, tag = "10")]
        pub short_key_page_footer: ::core::option::Option<ShortKeyFooterPb>,
    }
}
